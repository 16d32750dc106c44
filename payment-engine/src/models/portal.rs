//! Public client link model for payment-engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Capability token granting read-only access to one client's payment data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicClientLink {
    pub link_id: Uuid,
    pub client_id: Uuid,
    pub public_token: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: u64,
}
