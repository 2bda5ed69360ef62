//! Versioned schema for the host store.
//!
//! The stored version lives in `schema_version`. Migrations are applied in
//! order; a requested version beyond the newest migration only bumps the
//! marker. The marker for a fresh database is written by the population
//! transaction, not here, so a store is never marked current before its
//! initial dataset is in place.

use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::error::StoreError;

pub(crate) struct Migration {
    pub version: u32,
    pub statements: &'static [&'static str],
}

pub(crate) const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        statements: &[
            "CREATE TABLE IF NOT EXISTS https (\
                host TEXT PRIMARY KEY,\
                simple_upgrade INTEGER NOT NULL,\
                last_updated INTEGER NOT NULL\
            );",
            "CREATE INDEX IF NOT EXISTS idx_https_simple_upgrade ON https(simple_upgrade);",
        ],
    },
    Migration {
        version: 2,
        statements: &[
            "CREATE INDEX IF NOT EXISTS idx_https_last_updated ON https(last_updated DESC);",
        ],
    },
];

/// Newest version with schema changes.
pub const LATEST_SCHEMA_VERSION: u32 = 2;

/// Stored schema version, or `None` for a database that was never populated.
pub(crate) fn stored_version(conn: &Connection) -> Result<Option<u32>, StoreError> {
    let has_table: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    if has_table.is_none() {
        return Ok(None);
    }

    let version: Option<u32> = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version)
}

/// Apply every migration in `(from, to]` inside `tx`.
pub(crate) fn apply_migrations(tx: &Transaction<'_>, from: u32, to: u32) -> Result<(), StoreError> {
    tx.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY);")
        .map_err(|e| migration_error(to, e))?;

    for migration in MIGRATIONS {
        if migration.version <= from || migration.version > to {
            continue;
        }
        log::debug!(
            "applying host store migration {} -> {}",
            from,
            migration.version
        );
        for statement in migration.statements {
            tx.execute_batch(statement)
                .map_err(|e| migration_error(migration.version, e))?;
        }
    }
    Ok(())
}

/// Record `version` as the current schema version.
pub(crate) fn write_version(tx: &Transaction<'_>, version: u32) -> Result<(), StoreError> {
    tx.execute(
        "INSERT OR IGNORE INTO schema_version(version) VALUES (?1)",
        params![version],
    )
    .map_err(|e| migration_error(version, e))?;
    Ok(())
}

/// Create the schema for a database that has none yet, without marking it current.
pub(crate) fn create(conn: &mut Connection, version: u32) -> Result<(), StoreError> {
    let tx = conn.transaction().map_err(|e| migration_error(version, e))?;
    apply_migrations(&tx, 0, version)?;
    tx.commit().map_err(|e| migration_error(version, e))?;
    Ok(())
}

/// Upgrade an existing schema from `from` to `to` and bump the marker.
pub(crate) fn upgrade(conn: &mut Connection, from: u32, to: u32) -> Result<(), StoreError> {
    let tx = conn.transaction().map_err(|e| migration_error(to, e))?;
    apply_migrations(&tx, from, to)?;
    write_version(&tx, to)?;
    tx.commit().map_err(|e| migration_error(to, e))?;
    Ok(())
}

fn migration_error(version: u32, e: rusqlite::Error) -> StoreError {
    StoreError::MigrationFailed {
        version,
        reason: e.to_string(),
    }
}
