use std::path::Path;
#[cfg(unix)]
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::{FieldSyncError, Result};
use crate::models::{AbandonedEntry, CacheEntry, QueueCounts, QueueEntry};

use super::migration;
use super::{CommitGate, DurableStore, timed_out};

#[derive(Clone)]
pub struct SqliteDurableStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteDurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDurableStore").finish_non_exhaustive()
    }
}

impl SqliteDurableStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        migration::migrate(&conn)?;
        #[cfg(unix)]
        harden_sqlite_permissions(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn schema_version(&self) -> Result<Option<i64>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| FieldSyncError::mutex_poisoned("sqlite"))?;
        migration::stored_schema_version(&conn)
    }

    /// Runs `f` on the blocking pool while holding the connection lock, so
    /// statements from concurrent callers never interleave.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| FieldSyncError::mutex_poisoned("sqlite"))?;
            f(&conn)
        })
        .await
        .map_err(|err| FieldSyncError::Internal(format!("sqlite task failed: {err}")))?
    }

    async fn with_tx<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| FieldSyncError::mutex_poisoned("sqlite"))?;
            let tx = conn.transaction()?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await
        .map_err(|err| FieldSyncError::Internal(format!("sqlite task failed: {err}")))?
    }

    /// [`with_tx`](Self::with_tx) with a deadline. The blocking task only
    /// commits if it claims the gate before the caller gives up, so a
    /// `Timeout` result always means the transaction was rolled back.
    async fn with_tx_within<T, F>(&self, operation: &str, timeout: Duration, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let gate = CommitGate::new();
        let worker_gate = gate.clone();
        let mut task = tokio::task::spawn_blocking(move || -> Result<Option<T>> {
            let mut conn = conn
                .lock()
                .map_err(|_| FieldSyncError::mutex_poisoned("sqlite"))?;
            if worker_gate.is_cancelled() {
                return Ok(None);
            }
            let tx = conn.transaction()?;
            let value = f(&tx)?;
            if !worker_gate.try_commit() {
                tx.rollback()?;
                return Ok(None);
            }
            tx.commit()?;
            Ok(Some(value))
        });

        let waited = tokio::time::timeout(timeout, &mut task).await;
        let joined = match waited {
            Ok(joined) => joined,
            Err(_) if gate.try_cancel() => return Err(timed_out(operation, timeout)),
            // Commit already claimed; its result stands.
            Err(_) => task.await,
        };
        joined
            .map_err(|err| FieldSyncError::Internal(format!("sqlite task failed: {err}")))??
            .ok_or_else(|| FieldSyncError::Internal(format!("{operation} rolled back")))
    }
}

#[cfg(test)]
impl SqliteDurableStore {
    /// Holds the connection lock from another thread for `hold`. Returns once
    /// the lock is taken.
    pub(crate) fn hold_lock(&self, hold: Duration) -> std::thread::JoinHandle<()> {
        let conn = Arc::clone(&self.conn);
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let _guard = conn.lock().expect("sqlite lock");
            locked_tx.send(()).expect("signal lock");
            std::thread::sleep(hold);
        });
        locked_rx.recv().expect("lock taken");
        holder
    }
}

fn insert_queue_row(
    conn: &Connection,
    name: String,
    payload: serde_json::Value,
    queued_at: DateTime<Utc>,
) -> Result<QueueEntry> {
    conn.execute(
        r"
        INSERT INTO offline_queue(name, payload_json, queued_at, attempts)
        VALUES (?1, ?2, ?3, 0)
        ",
        params![name, payload.to_string(), format_timestamp(queued_at)],
    )?;
    Ok(QueueEntry {
        id: conn.last_insert_rowid(),
        name,
        payload,
        queued_at,
        attempts: 0,
        last_error: None,
    })
}

fn upsert_cache_row(conn: &Connection, entry: &CacheEntry) -> Result<()> {
    conn.execute(
        r"
        INSERT INTO cache_entries(key, value_json, written_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(key) DO UPDATE SET
          value_json = excluded.value_json,
          written_at = excluded.written_at
        ",
        params![entry.key, entry.value.to_string(), format_timestamp(entry.written_at)],
    )?;
    Ok(())
}

#[async_trait]
impl DurableStore for SqliteDurableStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let entry = conn
                .query_row(
                    "SELECT key, value_json, written_at FROM cache_entries WHERE key = ?1",
                    params![key],
                    cache_entry_from_row,
                )
                .optional()?;
            Ok(entry)
        })
        .await
    }

    async fn set(&self, entry: CacheEntry) -> Result<()> {
        self.with_conn(move |conn| upsert_cache_row(conn, &entry)).await
    }

    async fn set_within(&self, entry: CacheEntry, timeout: Duration) -> Result<()> {
        let operation = format!("cache write for `{}`", entry.key);
        self.with_tx_within(&operation, timeout, move |tx| upsert_cache_row(tx, &entry))
            .await
    }

    async fn list_cache_keys(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM cache_entries ORDER BY key ASC")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    async fn append_to_queue(
        &self,
        name: &str,
        payload: &serde_json::Value,
        queued_at: DateTime<Utc>,
    ) -> Result<QueueEntry> {
        let name = name.to_string();
        let payload = payload.clone();
        self.with_conn(move |conn| insert_queue_row(conn, name, payload, queued_at))
            .await
    }

    async fn append_to_queue_within(
        &self,
        name: &str,
        payload: &serde_json::Value,
        queued_at: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<QueueEntry> {
        let name = name.to_string();
        let payload = payload.clone();
        self.with_tx_within("queue append", timeout, move |tx| {
            insert_queue_row(tx, name, payload, queued_at)
        })
        .await
    }

    async fn read_queue(&self) -> Result<Vec<QueueEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r"
                SELECT id, name, payload_json, queued_at, attempts, last_error
                FROM offline_queue
                ORDER BY id ASC
                ",
            )?;
            let rows = stmt.query_map([], queue_entry_from_row)?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    async fn record_attempt(&self, id: i64, error: &str) -> Result<u32> {
        let error = error.to_string();
        self.with_conn(move |conn| {
            let attempts = conn
                .query_row(
                    r"
                    UPDATE offline_queue
                    SET attempts = attempts + 1, last_error = ?2
                    WHERE id = ?1
                    RETURNING attempts
                    ",
                    params![id, error],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;
            attempts
                .map(i64_to_u32_saturating)
                .ok_or_else(|| FieldSyncError::NotFound(format!("queue entry {id}")))
        })
        .await
    }

    async fn remove_from_queue(&self, id: i64) -> Result<bool> {
        self.with_conn(move |conn| {
            let affected = conn.execute("DELETE FROM offline_queue WHERE id = ?1", params![id])?;
            Ok(affected > 0)
        })
        .await
    }

    async fn record_abandoned(&self, abandoned: &AbandonedEntry) -> Result<()> {
        let abandoned = abandoned.clone();
        self.with_tx(move |tx| {
            let entry = &abandoned.entry;
            tx.execute(
                r"
                INSERT OR REPLACE INTO abandoned_entries(
                    id, name, payload_json, queued_at, attempts, last_error, abandoned_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ",
                params![
                    entry.id,
                    entry.name,
                    entry.payload.to_string(),
                    format_timestamp(entry.queued_at),
                    i64::from(entry.attempts),
                    abandoned.last_error,
                    format_timestamp(abandoned.abandoned_at)
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_abandoned(&self, limit: usize) -> Result<Vec<AbandonedEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                r"
                SELECT id, name, payload_json, queued_at, attempts, last_error, abandoned_at
                FROM abandoned_entries
                ORDER BY abandoned_at DESC, id DESC
                LIMIT ?1
                ",
            )?;
            let rows = stmt.query_map(
                params![usize_to_i64_saturating(limit)],
                abandoned_entry_from_row,
            )?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    async fn purge_abandoned(&self) -> Result<usize> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM abandoned_entries", [])?))
            .await
    }

    async fn counts(&self) -> Result<QueueCounts> {
        self.with_conn(|conn| {
            let (pending, oldest) = conn.query_row(
                "SELECT COUNT(*), MIN(queued_at) FROM offline_queue",
                [],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?)),
            )?;
            let abandoned =
                conn.query_row("SELECT COUNT(*) FROM abandoned_entries", [], |row| {
                    row.get::<_, i64>(0)
                })?;
            let cached_keys = conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| {
                row.get::<_, i64>(0)
            })?;
            let oldest_queued_at = oldest
                .map(|raw| parse_timestamp(1, &raw))
                .transpose()?;

            Ok(QueueCounts {
                pending: i64_to_u64_saturating(pending),
                abandoned: i64_to_u64_saturating(abandoned),
                cached_keys: i64_to_u64_saturating(cached_keys),
                oldest_queued_at,
            })
        })
        .await
    }
}

fn cache_entry_from_row(row: &Row<'_>) -> rusqlite::Result<CacheEntry> {
    Ok(CacheEntry {
        key: row.get(0)?,
        value: parse_json(1, &row.get::<_, String>(1)?)?,
        written_at: parse_timestamp(2, &row.get::<_, String>(2)?)?,
    })
}

fn queue_entry_from_row(row: &Row<'_>) -> rusqlite::Result<QueueEntry> {
    Ok(QueueEntry {
        id: row.get(0)?,
        name: row.get(1)?,
        payload: parse_json(2, &row.get::<_, String>(2)?)?,
        queued_at: parse_timestamp(3, &row.get::<_, String>(3)?)?,
        attempts: i64_to_u32_saturating(row.get::<_, i64>(4)?),
        last_error: row.get(5)?,
    })
}

fn abandoned_entry_from_row(row: &Row<'_>) -> rusqlite::Result<AbandonedEntry> {
    let last_error = row.get::<_, String>(5)?;
    Ok(AbandonedEntry {
        entry: QueueEntry {
            id: row.get(0)?,
            name: row.get(1)?,
            payload: parse_json(2, &row.get::<_, String>(2)?)?,
            queued_at: parse_timestamp(3, &row.get::<_, String>(3)?)?,
            attempts: i64_to_u32_saturating(row.get::<_, i64>(4)?),
            last_error: Some(last_error.clone()),
        },
        last_error,
        abandoned_at: parse_timestamp(6, &row.get::<_, String>(6)?)?,
    })
}

// Fixed-width UTC timestamps so text ordering in SQL matches time ordering.
fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err)))
}

fn parse_json(column: usize, raw: &str) -> rusqlite::Result<serde_json::Value> {
    serde_json::from_str(raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err)))
}

fn i64_to_u32_saturating(value: i64) -> u32 {
    if value <= 0 {
        0
    } else {
        u32::try_from(value).unwrap_or(u32::MAX)
    }
}

fn i64_to_u64_saturating(value: i64) -> u64 {
    if value <= 0 {
        0
    } else {
        u64::try_from(value).unwrap_or(u64::MAX)
    }
}

fn usize_to_i64_saturating(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(unix)]
fn harden_sqlite_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    for suffix in ["", "-wal", "-shm"] {
        let mut os = path.as_os_str().to_os_string();
        os.push(suffix);
        let candidate = PathBuf::from(os);
        if candidate.exists() {
            std::fs::set_permissions(candidate, std::fs::Permissions::from_mode(0o600))?;
        }
    }
    Ok(())
}
