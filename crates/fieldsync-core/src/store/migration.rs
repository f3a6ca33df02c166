use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{FieldSyncError, Result};

pub(super) const SCHEMA_VERSION: i64 = 1;
const SCHEMA_VERSION_KEY: &str = "schema_version";

const MIGRATION_SCHEMA_SQL: &str = r"
    PRAGMA journal_mode = WAL;
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS offline_queue (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        payload_json TEXT NOT NULL,
        queued_at TEXT NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT
    );

    CREATE TABLE IF NOT EXISTS cache_entries (
        key TEXT PRIMARY KEY,
        value_json TEXT NOT NULL,
        written_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS abandoned_entries (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        payload_json TEXT NOT NULL,
        queued_at TEXT NOT NULL,
        attempts INTEGER NOT NULL,
        last_error TEXT NOT NULL,
        abandoned_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS system_kv (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_abandoned_entries_abandoned_at
    ON abandoned_entries(abandoned_at DESC);
";

/// Brings a connection up to [`SCHEMA_VERSION`]. Idempotent.
pub(super) fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(MIGRATION_SCHEMA_SQL)?;

    if let Some(stored) = stored_schema_version(conn)?
        && stored > SCHEMA_VERSION
    {
        return Err(FieldSyncError::Validation(format!(
            "state database schema v{stored} is newer than supported v{SCHEMA_VERSION}"
        )));
    }
    conn.execute(
        r"
        INSERT INTO system_kv(key, value, updated_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(key) DO UPDATE SET
          value = excluded.value,
          updated_at = excluded.updated_at
        ",
        params![
            SCHEMA_VERSION_KEY,
            SCHEMA_VERSION.to_string(),
            chrono::Utc::now().to_rfc3339()
        ],
    )?;
    Ok(())
}

pub(super) fn stored_schema_version(conn: &Connection) -> Result<Option<i64>> {
    let raw = conn
        .query_row(
            "SELECT value FROM system_kv WHERE key = ?1",
            params![SCHEMA_VERSION_KEY],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    raw.map(|value| {
        value
            .parse::<i64>()
            .map_err(|_| FieldSyncError::Validation(format!("invalid schema version: {value}")))
    })
    .transpose()
}
