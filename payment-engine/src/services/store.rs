//! Persistent key-value storage for payment-engine.
//!
//! Every collection is stored as one serialized text value. Writers replace
//! the whole collection, so all mutations go through [`PersistentStore::modify`],
//! which reads the collection together with its revision and writes it back
//! with a compare-and-set. A concurrent writer makes the write fail, and the
//! mutation is re-applied on a fresh read instead of overwriting it.

use crate::services::metrics::STORE_OPERATION_DURATION;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, instrument, warn};

/// Named collections known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Clients,
    Invoices,
    PublicClientLinks,
    InvoiceSequence,
}

impl Collection {
    pub fn key(&self) -> &'static str {
        match self {
            Collection::Clients => "clients",
            Collection::Invoices => "invoices",
            Collection::PublicClientLinks => "public-client-links",
            Collection::InvoiceSequence => "invoice-sequence",
        }
    }
}

/// Raw value with the revision it was read at. Revision 0 means absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    pub value: String,
    pub revision: u64,
}

/// Bytes used versus the configured quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUsage {
    pub used_bytes: usize,
    pub quota_bytes: Option<usize>,
}

impl StorageUsage {
    pub fn available_bytes(&self) -> Option<usize> {
        self.quota_bytes
            .map(|quota| quota.saturating_sub(self.used_bytes))
    }
}

/// Backend contract. Implementations must make `compare_and_set` atomic
/// with respect to other writers of the same instance.
pub trait KeyValueStore: Send + Sync {
    fn get_raw(&self, key: &str) -> Result<Option<StoredValue>, AppError>;

    /// Write `value` only if the stored revision still equals `expected_revision`.
    /// Returns `Ok(false)` without writing when it does not.
    fn compare_and_set(
        &self,
        key: &str,
        expected_revision: u64,
        value: &str,
    ) -> Result<bool, AppError>;

    /// Unconditional replace.
    fn set_raw(&self, key: &str, value: &str) -> Result<(), AppError>;

    fn remove(&self, key: &str) -> Result<(), AppError>;

    fn keys(&self) -> Result<Vec<String>, AppError>;

    fn usage(&self) -> Result<StorageUsage, AppError>;
}

fn check_quota(
    key: &str,
    value: &str,
    used_by_others: usize,
    quota: Option<usize>,
) -> Result<(), AppError> {
    let Some(quota) = quota else {
        return Ok(());
    };
    let required = key.len() + value.len();
    if used_by_others + required > quota {
        return Err(AppError::StorageFull {
            collection: key.to_string(),
            required,
            available: quota.saturating_sub(used_by_others),
        });
    }
    Ok(())
}

// =============================================================================
// In-memory backend
// =============================================================================

#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, StoredValue>>,
    quota_bytes: Option<usize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredValue>>, AppError> {
        self.entries
            .lock()
            .map_err(|_| AppError::StorageError(anyhow::anyhow!("In-memory store lock poisoned")))
    }

    fn write_locked(
        &self,
        entries: &mut HashMap<String, StoredValue>,
        key: &str,
        value: &str,
    ) -> Result<(), AppError> {
        let used_by_others: usize = entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| k.len() + v.value.len())
            .sum();
        check_quota(key, value, used_by_others, self.quota_bytes)?;

        let revision = entries.get(key).map(|v| v.revision).unwrap_or(0) + 1;
        entries.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                revision,
            },
        );
        Ok(())
    }
}

impl KeyValueStore for InMemoryStore {
    fn get_raw(&self, key: &str) -> Result<Option<StoredValue>, AppError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn compare_and_set(
        &self,
        key: &str,
        expected_revision: u64,
        value: &str,
    ) -> Result<bool, AppError> {
        let mut entries = self.lock()?;
        let current = entries.get(key).map(|v| v.revision).unwrap_or(0);
        if current != expected_revision {
            return Ok(false);
        }
        self.write_locked(&mut entries, key, value)?;
        Ok(true)
    }

    fn set_raw(&self, key: &str, value: &str) -> Result<(), AppError> {
        let mut entries = self.lock()?;
        self.write_locked(&mut entries, key, value)
    }

    fn remove(&self, key: &str) -> Result<(), AppError> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, AppError> {
        let mut keys: Vec<String> = self.lock()?.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn usage(&self) -> Result<StorageUsage, AppError> {
        let used_bytes = self
            .lock()?
            .iter()
            .map(|(k, v)| k.len() + v.value.len())
            .sum();
        Ok(StorageUsage {
            used_bytes,
            quota_bytes: self.quota_bytes,
        })
    }
}

// =============================================================================
// File backend
// =============================================================================

/// One `<key>.json` file per collection plus a `<key>.rev` revision file.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    quota_bytes: Option<usize>,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>, quota_bytes: Option<usize>) -> Result<Self, AppError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            AppError::StorageError(anyhow::anyhow!(
                "Failed to create storage directory {}: {}",
                root.display(),
                e
            ))
        })?;
        debug!(root = %root.display(), "File store opened");
        Ok(Self {
            root,
            quota_bytes,
            write_lock: Mutex::new(()),
        })
    }

    fn value_path(&self, key: &str) -> Result<PathBuf, AppError> {
        if key.is_empty() || key.contains(['/', '\\']) || key.contains("..") {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invalid storage key '{}'",
                key
            )));
        }
        Ok(self.root.join(format!("{}.json", key)))
    }

    fn revision_path(&self, key: &str) -> Result<PathBuf, AppError> {
        Ok(self.value_path(key)?.with_extension("rev"))
    }

    fn read_revision(&self, key: &str) -> Result<u64, AppError> {
        let path = self.revision_path(key)?;
        if !path.exists() {
            return Ok(0);
        }
        let raw = fs::read_to_string(&path)?;
        raw.trim().parse().map_err(|e| {
            AppError::StorageError(anyhow::anyhow!(
                "Corrupt revision file {}: {}",
                path.display(),
                e
            ))
        })
    }

    fn used_by_others(&self, key: &str) -> Result<usize, AppError> {
        let mut used = 0;
        for other in self.keys()? {
            if other == key {
                continue;
            }
            let len = fs::metadata(self.value_path(&other)?)?.len() as usize;
            used += other.len() + len;
        }
        Ok(used)
    }

    fn write_locked(&self, key: &str, value: &str) -> Result<(), AppError> {
        check_quota(key, value, self.used_by_others(key)?, self.quota_bytes)?;
        let revision = self.read_revision(key)? + 1;
        atomic_write(&self.value_path(key)?, value)?;
        atomic_write(&self.revision_path(key)?, &revision.to_string())?;
        Ok(())
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>, AppError> {
        self.write_lock
            .lock()
            .map_err(|_| AppError::StorageError(anyhow::anyhow!("File store lock poisoned")))
    }
}

fn atomic_write(path: &Path, content: &str) -> Result<(), AppError> {
    let temp_path = path.with_extension("tmp");

    fs::write(&temp_path, content).map_err(|e| {
        AppError::StorageError(anyhow::anyhow!("Failed to write temp file: {}", e))
    })?;

    fs::rename(&temp_path, path).map_err(|e| {
        AppError::StorageError(anyhow::anyhow!("Failed to rename temp file: {}", e))
    })?;

    Ok(())
}

impl KeyValueStore for FileStore {
    fn get_raw(&self, key: &str) -> Result<Option<StoredValue>, AppError> {
        // Value and revision must come from the same write.
        let _guard = self.guard()?;
        let path = self.value_path(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let value = fs::read_to_string(&path)?;
        let revision = self.read_revision(key)?;
        Ok(Some(StoredValue { value, revision }))
    }

    fn compare_and_set(
        &self,
        key: &str,
        expected_revision: u64,
        value: &str,
    ) -> Result<bool, AppError> {
        let _guard = self.guard()?;
        if self.read_revision(key)? != expected_revision {
            return Ok(false);
        }
        self.write_locked(key, value)?;
        Ok(true)
    }

    fn set_raw(&self, key: &str, value: &str) -> Result<(), AppError> {
        let _guard = self.guard()?;
        self.write_locked(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), AppError> {
        let _guard = self.guard()?;
        for path in [self.value_path(key)?, self.revision_path(key)?] {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, AppError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn usage(&self) -> Result<StorageUsage, AppError> {
        Ok(StorageUsage {
            used_bytes: self.used_by_others("")?,
            quota_bytes: self.quota_bytes,
        })
    }
}

// =============================================================================
// Typed access
// =============================================================================

/// A collection's records together with the revision they were read at.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    pub records: Vec<T>,
    pub revision: u64,
}

/// Typed, collection-oriented wrapper over a [`KeyValueStore`].
#[derive(Clone)]
pub struct PersistentStore {
    backend: Arc<dyn KeyValueStore>,
    cas_attempts: u32,
}

impl PersistentStore {
    pub fn new(backend: Arc<dyn KeyValueStore>, cas_attempts: u32) -> Self {
        Self {
            backend,
            cas_attempts: cas_attempts.max(1),
        }
    }

    /// Read a collection with its revision. Missing collections are empty.
    pub fn load<T: DeserializeOwned>(&self, collection: Collection) -> Result<Snapshot<T>, AppError> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["load"])
            .start_timer();

        let snapshot = match self.backend.get_raw(collection.key())? {
            Some(stored) => Snapshot {
                records: serde_json::from_str(&stored.value)?,
                revision: stored.revision,
            },
            None => Snapshot {
                records: Vec::new(),
                revision: 0,
            },
        };

        timer.observe_duration();
        Ok(snapshot)
    }

    pub fn get<T: DeserializeOwned>(&self, collection: Collection) -> Result<Vec<T>, AppError> {
        Ok(self.load(collection)?.records)
    }

    /// Replace a collection wholesale, ignoring concurrent writers.
    #[instrument(skip(self, records), fields(collection = collection.key()))]
    pub fn set<T: Serialize>(&self, collection: Collection, records: &[T]) -> Result<(), AppError> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["set"])
            .start_timer();

        let value = serde_json::to_string(records)?;
        self.backend.set_raw(collection.key(), &value)?;

        timer.observe_duration();
        Ok(())
    }

    /// Read-modify-write of a whole collection guarded by its revision.
    ///
    /// `apply` may run more than once and must only depend on its input.
    /// An error from `apply` aborts without writing.
    #[instrument(skip(self, apply), fields(collection = collection.key()))]
    pub fn modify<T, R, F>(&self, collection: Collection, mut apply: F) -> Result<R, AppError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(&mut Vec<T>) -> Result<R, AppError>,
    {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["modify"])
            .start_timer();

        for attempt in 1..=self.cas_attempts {
            let Snapshot {
                mut records,
                revision,
            } = self.load::<T>(collection)?;
            let result = apply(&mut records)?;
            let value = serde_json::to_string(&records)?;

            if self
                .backend
                .compare_and_set(collection.key(), revision, &value)?
            {
                timer.observe_duration();
                return Ok(result);
            }

            warn!(
                attempt = attempt,
                revision = revision,
                "Collection changed during read-modify-write, retrying"
            );
        }

        Err(AppError::Conflict(anyhow::anyhow!(
            "Collection '{}' kept changing concurrently after {} attempts",
            collection.key(),
            self.cas_attempts
        )))
    }

    /// Revision-guarded update of a singleton document.
    pub fn modify_document<T, R, F>(&self, collection: Collection, mut apply: F) -> Result<R, AppError>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnMut(&mut T) -> Result<R, AppError>,
    {
        for _ in 0..self.cas_attempts {
            let (mut document, revision) = match self.backend.get_raw(collection.key())? {
                Some(stored) => (serde_json::from_str::<T>(&stored.value)?, stored.revision),
                None => (T::default(), 0),
            };
            let result = apply(&mut document)?;
            let value = serde_json::to_string(&document)?;
            if self
                .backend
                .compare_and_set(collection.key(), revision, &value)?
            {
                return Ok(result);
            }
        }

        Err(AppError::Conflict(anyhow::anyhow!(
            "Document '{}' kept changing concurrently",
            collection.key()
        )))
    }

    pub fn usage(&self) -> Result<StorageUsage, AppError> {
        self.backend.usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store(backend: impl KeyValueStore + 'static) -> PersistentStore {
        PersistentStore::new(Arc::new(backend), 3)
    }

    #[test]
    fn missing_collection_reads_as_empty() {
        let store = store(InMemoryStore::new());
        let records: Vec<String> = store.get(Collection::Clients).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn stale_revision_is_rejected() {
        let backend = InMemoryStore::new();
        assert!(backend.compare_and_set("clients", 0, "[]").unwrap());
        assert!(!backend.compare_and_set("clients", 0, "[1]").unwrap());
        let stored = backend.get_raw("clients").unwrap().unwrap();
        assert_eq!(stored.value, "[]");
        assert_eq!(stored.revision, 1);
    }

    #[test]
    fn quota_rejects_write_and_keeps_old_value() {
        let backend = InMemoryStore::with_quota(32);
        backend.set_raw("clients", "[\"a\"]").unwrap();

        let err = backend
            .set_raw("clients", &format!("[\"{}\"]", "x".repeat(64)))
            .unwrap_err();
        match err {
            AppError::StorageFull {
                collection,
                required,
                available,
            } => {
                assert_eq!(collection, "clients");
                assert!(required > available);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(backend.get_raw("clients").unwrap().unwrap().value, "[\"a\"]");
    }

    #[test]
    fn modify_applies_on_fresh_read() {
        let store = store(InMemoryStore::new());
        store.set(Collection::Invoices, &[1u32, 2]).unwrap();

        let len = store
            .modify(Collection::Invoices, |records: &mut Vec<u32>| {
                records.push(3);
                Ok(records.len())
            })
            .unwrap();

        assert_eq!(len, 3);
        assert_eq!(store.get::<u32>(Collection::Invoices).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn modify_error_writes_nothing() {
        let store = store(InMemoryStore::new());
        store.set(Collection::Invoices, &[1u32]).unwrap();

        let result: Result<(), AppError> = store.modify(Collection::Invoices, |records: &mut Vec<u32>| {
            records.clear();
            Err(AppError::NotFound(anyhow::anyhow!("nope")))
        });

        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(store.get::<u32>(Collection::Invoices).unwrap(), vec![1]);
    }

    #[test]
    fn document_starts_from_default() {
        let store = store(InMemoryStore::new());
        for expected in [1u32, 2] {
            let next = store
                .modify_document(Collection::InvoiceSequence, |n: &mut u32| {
                    *n += 1;
                    Ok(*n)
                })
                .unwrap();
            assert_eq!(next, expected);
        }
    }

    #[test]
    fn file_store_persists_across_instances() {
        let temp = tempdir().unwrap();
        {
            let backend = FileStore::open(temp.path(), None).unwrap();
            assert!(backend.compare_and_set("clients", 0, "[1,2]").unwrap());
        }
        let backend = FileStore::open(temp.path(), None).unwrap();
        let stored = backend.get_raw("clients").unwrap().unwrap();
        assert_eq!(stored.value, "[1,2]");
        assert_eq!(stored.revision, 1);
        assert_eq!(backend.keys().unwrap(), vec!["clients".to_string()]);
    }

    #[test]
    fn file_store_enforces_quota_and_rejects_bad_keys() {
        let temp = tempdir().unwrap();
        let backend = FileStore::open(temp.path(), Some(24)).unwrap();
        backend.set_raw("clients", "[]").unwrap();
        assert!(backend
            .set_raw("invoices", &"x".repeat(40))
            .unwrap_err()
            .is_storage_full());
        assert!(backend.set_raw("../escape", "[]").is_err());
        assert_eq!(backend.usage().unwrap().used_bytes, "clients".len() + 2);
    }

    #[test]
    fn file_store_concurrent_modifies_lose_nothing() {
        let temp = tempdir().unwrap();
        let store = PersistentStore::new(
            Arc::new(FileStore::open(temp.path(), None).unwrap()),
            u32::MAX,
        );

        let handles: Vec<_> = (0..4u32)
            .map(|worker| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..50u32 {
                        store
                            .modify(Collection::Invoices, |records: &mut Vec<u32>| {
                                records.push(worker * 1_000 + i);
                                Ok(())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut records = store.get::<u32>(Collection::Invoices).unwrap();
        records.sort_unstable();
        records.dedup();
        assert_eq!(records.len(), 200);
    }

    #[test]
    fn removed_key_disappears() {
        let temp = tempdir().unwrap();
        let backend = FileStore::open(temp.path(), None).unwrap();
        backend.set_raw("public-client-links", "[]").unwrap();
        backend.remove("public-client-links").unwrap();
        assert!(backend.get_raw("public-client-links").unwrap().is_none());
        assert!(backend.keys().unwrap().is_empty());
    }
}
