//! Durable per-addon status storage
//!
//! The enabled flag and the last dependency verdict of an addon live outside its
//! declaration file, keyed by addon id. Every backend applies writes atomically
//! per key; ids that were never written read as disabled with no verdict.

pub mod json;
pub mod sqlite;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::config::{Config, StatusBackend};
use crate::core::error::{AddonError, Result};
use crate::db::DatabaseManager;
use crate::resolver::DependencyVerdict;

pub use json::JsonStatusStore;
pub use sqlite::SqliteStatusStore;

/// Storage medium for enabled flags and cached dependency verdicts
pub trait StatusStore: Send + Sync {
    /// Persisted enabled flag, `None` if the id was never written
    fn enabled(&self, id: &str) -> Result<Option<bool>>;

    fn set_enabled(&self, id: &str, enabled: bool) -> Result<()>;

    /// Last verdict stored for `id`
    fn verdict(&self, id: &str) -> Result<Option<DependencyVerdict>>;

    fn put_verdict(&self, id: &str, verdict: &DependencyVerdict) -> Result<()>;

    fn clear_verdict(&self, id: &str) -> Result<()>;

    /// Drop everything stored for `id`
    fn forget(&self, id: &str) -> Result<()>;
}

/// Everything a store keeps for one addon id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<DependencyVerdict>,
}

/// Open the store selected by the configuration
pub fn open(config: &Config) -> Result<Arc<dyn StatusStore>> {
    let path = config.status_path();
    let store: Arc<dyn StatusStore> = match config.status.backend {
        StatusBackend::Json => Arc::new(JsonStatusStore::open(&path)?),
        StatusBackend::Sqlite => {
            let db = DatabaseManager::new(
                &path,
                config.database.connection_pool_size,
                Duration::from_millis(config.database.busy_timeout),
            )?;
            Arc::new(SqliteStatusStore::new(db))
        }
    };
    tracing::debug!(path = ?path, backend = ?config.status.backend, "Status store opened");
    Ok(store)
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| AddonError::Storage("status store lock poisoned".to_string()))
}

/// Process-local store, used when nothing has to survive a restart
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    records: Mutex<HashMap<String, StatusRecord>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusStore for MemoryStatusStore {
    fn enabled(&self, id: &str) -> Result<Option<bool>> {
        Ok(lock(&self.records)?.get(id).map(|r| r.enabled))
    }

    fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        lock(&self.records)?.entry(id.to_string()).or_default().enabled = enabled;
        Ok(())
    }

    fn verdict(&self, id: &str) -> Result<Option<DependencyVerdict>> {
        Ok(lock(&self.records)?.get(id).and_then(|r| r.verdict.clone()))
    }

    fn put_verdict(&self, id: &str, verdict: &DependencyVerdict) -> Result<()> {
        lock(&self.records)?.entry(id.to_string()).or_default().verdict = Some(verdict.clone());
        Ok(())
    }

    fn clear_verdict(&self, id: &str) -> Result<()> {
        if let Some(record) = lock(&self.records)?.get_mut(id) {
            record.verdict = None;
        }
        Ok(())
    }

    fn forget(&self, id: &str) -> Result<()> {
        lock(&self.records)?.remove(id);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;

    pub(crate) fn sample_verdict(satisfied: bool) -> DependencyVerdict {
        DependencyVerdict {
            satisfied,
            checked_against: vec!["requests==2.31.0".to_string()],
            digest: crate::core::utils::digest_strings(&["requests==2.31.0"]),
            checked_at: Utc::now(),
            unsatisfied: if satisfied {
                Vec::new()
            } else {
                vec!["requests==2.31.0".to_string()]
            },
        }
    }

    /// Behaviour every backend must share
    pub(crate) fn exercise_store(store: &dyn StatusStore) {
        assert_eq!(store.enabled("demo").unwrap(), None);
        assert!(store.verdict("demo").unwrap().is_none());

        store.set_enabled("demo", true).unwrap();
        assert_eq!(store.enabled("demo").unwrap(), Some(true));
        store.set_enabled("demo", false).unwrap();
        assert_eq!(store.enabled("demo").unwrap(), Some(false));

        let verdict = sample_verdict(true);
        store.put_verdict("demo", &verdict).unwrap();
        assert_eq!(store.verdict("demo").unwrap(), Some(verdict));
        // Writing the verdict leaves the flag alone
        assert_eq!(store.enabled("demo").unwrap(), Some(false));

        store.clear_verdict("demo").unwrap();
        assert!(store.verdict("demo").unwrap().is_none());
        assert_eq!(store.enabled("demo").unwrap(), Some(false));

        store.put_verdict("other", &sample_verdict(false)).unwrap();
        assert_eq!(store.enabled("other").unwrap(), Some(false));

        store.forget("demo").unwrap();
        assert_eq!(store.enabled("demo").unwrap(), None);
        assert!(store.verdict("other").unwrap().is_some());
    }

    #[test]
    fn test_memory_store() {
        exercise_store(&MemoryStatusStore::new());
    }
}
