//! Common test utilities for payment-engine integration tests.
#![allow(dead_code)]

use payment_engine::config::EngineConfig;
use payment_engine::models::{Client, CreateClient, PaymentMethod};
use payment_engine::services::payments::RecordPayment;
use payment_engine::services::store::{InMemoryStore, KeyValueStore, StorageUsage, StoredValue};
use payment_engine::services::NotificationBus;
use payment_engine::startup::Engine;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,payment_engine=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.service_name = "payment-engine-test".to_string();
    config.log_level = "debug".to_string();
    config
}

/// Engine over a fresh in-memory backend.
pub fn spawn_engine() -> Engine {
    init_tracing();
    Engine::with_backend(
        Arc::new(InMemoryStore::new()),
        NotificationBus::new(),
        &test_config(),
    )
}

/// Engine over a caller-supplied backend and bus.
pub fn engine_on(backend: Arc<dyn KeyValueStore>, bus: NotificationBus) -> Engine {
    init_tracing();
    Engine::with_backend(backend, bus, &test_config())
}

pub fn seed_client(engine: &Engine, total: i64) -> Client {
    engine
        .clients
        .create(CreateClient {
            name: format!("Client {}", &Uuid::new_v4().to_string()[..8]),
            email: Some("client@example.com".to_string()),
            phone: Some("+62 812 0000 0000".to_string()),
            total_amount: Decimal::from(total),
        })
        .expect("Failed to seed client")
}

pub fn payment(client_id: Uuid, amount: i64) -> RecordPayment {
    RecordPayment {
        client_id,
        amount: Decimal::from(amount),
        method: PaymentMethod::Transfer,
        reference: Some("TRX-0001".to_string()),
        date: None,
        service_description: Some("Wedding photography".to_string()),
    }
}

/// Key that starts failing once its allowance of writes is used up.
struct FailingKey {
    key: String,
    allowed: usize,
}

/// In-memory backend that rejects writes to one key with `StorageFull`
/// once armed.
pub struct FailingStore {
    inner: InMemoryStore,
    failing: Mutex<Option<FailingKey>>,
}

impl FailingStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            failing: Mutex::new(None),
        }
    }

    pub fn fail_writes_to(&self, key: &str) {
        self.fail_writes_to_after(key, 0);
    }

    /// Let `allowed` more writes to `key` through, then fail the rest.
    pub fn fail_writes_to_after(&self, key: &str, allowed: usize) {
        *self.failing.lock().unwrap() = Some(FailingKey {
            key: key.to_string(),
            allowed,
        });
    }

    pub fn heal(&self) {
        *self.failing.lock().unwrap() = None;
    }

    fn check(&self, key: &str, value: &str) -> Result<(), AppError> {
        let mut failing = self.failing.lock().unwrap();
        let Some(failing) = failing.as_mut().filter(|f| f.key == key) else {
            return Ok(());
        };
        if failing.allowed > 0 {
            failing.allowed -= 1;
            return Ok(());
        }
        Err(AppError::StorageFull {
            collection: key.to_string(),
            required: key.len() + value.len(),
            available: 0,
        })
    }
}

impl KeyValueStore for FailingStore {
    fn get_raw(&self, key: &str) -> Result<Option<StoredValue>, AppError> {
        self.inner.get_raw(key)
    }

    fn compare_and_set(&self, key: &str, expected_revision: u64, value: &str) -> Result<bool, AppError> {
        self.check(key, value)?;
        self.inner.compare_and_set(key, expected_revision, value)
    }

    fn set_raw(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.check(key, value)?;
        self.inner.set_raw(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), AppError> {
        self.inner.remove(key)
    }

    fn keys(&self) -> Result<Vec<String>, AppError> {
        self.inner.keys()
    }

    fn usage(&self) -> Result<StorageUsage, AppError> {
        self.inner.usage()
    }
}

type Race = Box<dyn FnOnce() + Send>;

/// Backend that runs a one-shot closure right before the next
/// compare-and-set on `key`, simulating another tab writing between this
/// writer's read and its write.
pub struct RacingStore {
    inner: Arc<InMemoryStore>,
    key: String,
    race: Mutex<Option<Race>>,
    fired: AtomicBool,
}

impl RacingStore {
    pub fn new(inner: Arc<InMemoryStore>, key: &str) -> Self {
        Self {
            inner,
            key: key.to_string(),
            race: Mutex::new(None),
            fired: AtomicBool::new(false),
        }
    }

    pub fn arm<F>(&self, race: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.race.lock().unwrap() = Some(Box::new(race));
    }

    pub fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl KeyValueStore for RacingStore {
    fn get_raw(&self, key: &str) -> Result<Option<StoredValue>, AppError> {
        self.inner.get_raw(key)
    }

    fn compare_and_set(&self, key: &str, expected_revision: u64, value: &str) -> Result<bool, AppError> {
        if key == self.key {
            let race = self.race.lock().unwrap().take();
            if let Some(race) = race {
                race();
                self.fired.store(true, Ordering::SeqCst);
            }
        }
        self.inner.compare_and_set(key, expected_revision, value)
    }

    fn set_raw(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.inner.set_raw(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), AppError> {
        self.inner.remove(key)
    }

    fn keys(&self) -> Result<Vec<String>, AppError> {
        self.inner.keys()
    }

    fn usage(&self) -> Result<StorageUsage, AppError> {
        self.inner.usage()
    }
}
