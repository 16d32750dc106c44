//! Identifier and capability-token generation.

use rand::Rng;
use uuid::Uuid;

/// Source of record ids and public access tokens.
pub trait IdGenerator: Send + Sync {
    fn record_id(&self) -> Uuid;

    /// Unguessable token for unauthenticated, read-only lookups.
    fn access_token(&self) -> String;
}

/// UUID v4 ids and 256-bit random hex tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn record_id(&self) -> Uuid {
        Uuid::new_v4()
    }

    fn access_token(&self) -> String {
        let mut rng = rand::thread_rng();
        let token_bytes: [u8; 32] = rng.gen();
        hex::encode(token_bytes)
    }
}
