//! Database Migrations
//!
//! Schema migration definitions for the shared database file. Module tables
//! are created dynamically per module configuration; migrations own only the
//! fixed tables (CMI, registry, process metadata).

use rusqlite::Connection;

use crate::error::StoreError;

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Core metadata, module registry, and CMI index",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "CMI access tracking columns and routing index",
        up: MIGRATION_V2_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: fixed tables
const MIGRATION_V1_UP: &str = r#"
-- Process-wide metadata (projection seed, schema fingerprints)
CREATE TABLE IF NOT EXISTS core_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Persisted module descriptors; the registry is the source of truth for
-- which modules exist right now
CREATE TABLE IF NOT EXISTS module_registry (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    module_type TEXT NOT NULL DEFAULT 'standard',
    configuration TEXT NOT NULL DEFAULT '{}',
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Central Memory Index: one compressed pointer per memory across all modules
CREATE TABLE IF NOT EXISTS cmi_index (
    user_id TEXT NOT NULL,
    module_id TEXT NOT NULL,
    remote_memory_id TEXT NOT NULL,
    cvec BLOB NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    summary TEXT NOT NULL DEFAULT '',
    keywords TEXT NOT NULL DEFAULT '[]',
    categories TEXT NOT NULL DEFAULT '[]',
    importance_score REAL NOT NULL DEFAULT 0.5,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (user_id, module_id, remote_memory_id)
);

CREATE INDEX IF NOT EXISTS idx_cmi_user ON cmi_index(user_id);
"#;

/// V2: access tracking on index rows, reverse lookup for deletes
const MIGRATION_V2_UP: &str = r#"
ALTER TABLE cmi_index ADD COLUMN access_count INTEGER NOT NULL DEFAULT 0;
ALTER TABLE cmi_index ADD COLUMN last_accessed TEXT;

CREATE INDEX IF NOT EXISTS idx_cmi_remote ON cmi_index(module_id, remote_memory_id);
"#;

/// Apply all pending migrations to a connection.
pub fn apply_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        tracing::info!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );
        conn.execute_batch(migration.up)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, description, applied_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![
                migration.version,
                migration.description,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
    }

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
