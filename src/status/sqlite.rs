//! Status store backed by the SQLite `addon_status` table

use rusqlite::{params, OptionalExtension};

use super::StatusStore;
use crate::core::error::{ErrorContext, Result};
use crate::db::DatabaseManager;
use crate::resolver::DependencyVerdict;

#[derive(Clone)]
pub struct SqliteStatusStore {
    db: DatabaseManager,
}

impl SqliteStatusStore {
    pub fn new(db: DatabaseManager) -> Self {
        Self { db }
    }
}

impl StatusStore for SqliteStatusStore {
    fn enabled(&self, id: &str) -> Result<Option<bool>> {
        let conn = self.db.get_connection()?;
        let enabled = conn
            .query_row(
                "SELECT enabled FROM addon_status WHERE addon_id = ?1",
                [id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(enabled.map(|value| value != 0))
    }

    fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let conn = self.db.get_connection()?;
        conn.execute(
            "INSERT INTO addon_status (addon_id, enabled, updated_at)
             VALUES (?1, ?2, CURRENT_TIMESTAMP)
             ON CONFLICT(addon_id) DO UPDATE SET
                enabled = excluded.enabled,
                updated_at = CURRENT_TIMESTAMP",
            params![id, enabled as i64],
        )?;
        Ok(())
    }

    fn verdict(&self, id: &str) -> Result<Option<DependencyVerdict>> {
        let conn = self.db.get_connection()?;
        let raw: Option<Option<String>> = conn
            .query_row(
                "SELECT verdict FROM addon_status WHERE addon_id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()?;

        match raw.flatten() {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .with_context(|| format!("Corrupt verdict stored for {}", id)),
            None => Ok(None),
        }
    }

    fn put_verdict(&self, id: &str, verdict: &DependencyVerdict) -> Result<()> {
        let json = serde_json::to_string(verdict)?;
        let conn = self.db.get_connection()?;
        conn.execute(
            "INSERT INTO addon_status (addon_id, verdict, verdict_digest, updated_at)
             VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)
             ON CONFLICT(addon_id) DO UPDATE SET
                verdict = excluded.verdict,
                verdict_digest = excluded.verdict_digest,
                updated_at = CURRENT_TIMESTAMP",
            params![id, json, verdict.digest],
        )?;
        Ok(())
    }

    fn clear_verdict(&self, id: &str) -> Result<()> {
        let conn = self.db.get_connection()?;
        conn.execute(
            "UPDATE addon_status SET verdict = NULL, verdict_digest = NULL,
                updated_at = CURRENT_TIMESTAMP
             WHERE addon_id = ?1",
            [id],
        )?;
        Ok(())
    }

    fn forget(&self, id: &str) -> Result<()> {
        let conn = self.db.get_connection()?;
        conn.execute("DELETE FROM addon_status WHERE addon_id = ?1", [id])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::tests::{exercise_store, sample_verdict};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_sqlite_store_contract() {
        let store = SqliteStatusStore::new(DatabaseManager::new_in_memory().unwrap());
        exercise_store(&store);
    }

    #[test]
    fn test_sqlite_store_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".addon-status.db");

        {
            let db = DatabaseManager::new(&path, 2, Duration::from_secs(5)).unwrap();
            let store = SqliteStatusStore::new(db);
            store.set_enabled("demo", true).unwrap();
            store.put_verdict("demo", &sample_verdict(false)).unwrap();
        }

        let db = DatabaseManager::new(&path, 2, Duration::from_secs(5)).unwrap();
        let store = SqliteStatusStore::new(db);
        assert_eq!(store.enabled("demo").unwrap(), Some(true));
        let verdict = store.verdict("demo").unwrap().unwrap();
        assert!(!verdict.satisfied);
        assert_eq!(verdict.unsatisfied, vec!["requests==2.31.0".to_string()]);
    }
}
