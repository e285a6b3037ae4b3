//! Database migrations
//!
//! Schema versions are tracked in `schema_migrations`; each migration runs in
//! its own transaction and is recorded only when it commits.

use crate::core::error::Result;
use rusqlite::Connection;
use tracing::{info, warn};

/// Migration tracking table
const MIGRATION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
);
"#;

/// Initial schema migration (version 1)
const MIGRATION_V1: &str = r#"
-- One row per addon id; survives re-discovery and process restarts
CREATE TABLE IF NOT EXISTS addon_status (
    addon_id TEXT PRIMARY KEY,
    enabled INTEGER NOT NULL DEFAULT 0,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);
"#;

/// Second schema migration (version 2)
const MIGRATION_V2: &str = r#"
-- Persisted dependency verdicts, stored as JSON next to the enabled flag
ALTER TABLE addon_status ADD COLUMN verdict TEXT;
ALTER TABLE addon_status ADD COLUMN verdict_digest TEXT;
CREATE INDEX IF NOT EXISTS idx_addon_status_enabled ON addon_status(enabled);
"#;

const MIGRATIONS: &[(i64, &str, &str)] = &[
    (1, "Addon status table", MIGRATION_V1),
    (2, "Dependency verdict columns", MIGRATION_V2),
];

/// Run all pending database migrations
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    info!("Running database migrations");

    conn.execute_batch(MIGRATION_TABLE)?;

    let current_version = current_version(conn)?;
    info!("Current database schema version: {}", current_version);

    for (version, description, sql) in MIGRATIONS {
        if current_version < *version {
            info!("Applying migration v{}: {}", version, description);
            apply_migration(conn, *version, sql)?;
        }
    }

    info!("Database migrations completed successfully");
    Ok(())
}

/// Highest applied schema version, 0 for a fresh database
pub fn current_version(conn: &Connection) -> Result<i64> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Apply a single migration
fn apply_migration(conn: &mut Connection, version: i64, sql: &str) -> Result<()> {
    let tx = conn.transaction()?;

    tx.execute_batch(sql).map_err(|e| {
        warn!("Migration v{} failed: {}", version, e);
        e
    })?;

    tx.execute("INSERT INTO schema_migrations (version) VALUES (?)", [version])?;

    tx.commit()?;

    info!("Migration v{} applied successfully", version);
    Ok(())
}
