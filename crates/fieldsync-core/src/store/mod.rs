use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{FieldSyncError, Result};
use crate::models::{AbandonedEntry, CacheEntry, QueueCounts, QueueEntry};

mod memory;
mod migration;
mod sqlite;

pub use memory::MemoryDurableStore;
pub use sqlite::SqliteDurableStore;

/// Durable key-value store backing both the offline queue and the read cache.
///
/// Every operation is atomic on its own; there is no transaction spanning
/// calls. Queue mutations are serialized by the implementation.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Replaces any existing entry for `entry.key`.
    async fn set(&self, entry: CacheEntry) -> Result<()>;

    async fn list_cache_keys(&self) -> Result<Vec<String>>;

    /// Appends at the tail of the queue with `attempts = 0`.
    async fn append_to_queue(
        &self,
        name: &str,
        payload: &serde_json::Value,
        queued_at: DateTime<Utc>,
    ) -> Result<QueueEntry>;

    /// [`append_to_queue`](Self::append_to_queue) bounded by `timeout`. On
    /// `Timeout` the entry is not in the queue and never will be.
    ///
    /// The default drops the pending future, which is only sound for stores
    /// that do all their work while polled. Stores that hand writes to another
    /// thread override this.
    async fn append_to_queue_within(
        &self,
        name: &str,
        payload: &serde_json::Value,
        queued_at: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<QueueEntry> {
        tokio::time::timeout(timeout, self.append_to_queue(name, payload, queued_at))
            .await
            .map_err(|_| timed_out("queue append", timeout))?
    }

    /// [`set`](Self::set) bounded by `timeout`, with the same guarantee as
    /// [`append_to_queue_within`](Self::append_to_queue_within): a timed-out
    /// write never lands later.
    async fn set_within(&self, entry: CacheEntry, timeout: Duration) -> Result<()> {
        let key = entry.key.clone();
        tokio::time::timeout(timeout, self.set(entry))
            .await
            .map_err(|_| timed_out(&format!("cache write for `{key}`"), timeout))?
    }

    /// Full queue snapshot in replay order.
    async fn read_queue(&self) -> Result<Vec<QueueEntry>>;

    /// Increments the attempt counter and records the failure message.
    /// Returns the new attempt count.
    async fn record_attempt(&self, id: i64, error: &str) -> Result<u32>;

    async fn remove_from_queue(&self, id: i64) -> Result<bool>;

    async fn record_abandoned(&self, abandoned: &AbandonedEntry) -> Result<()>;

    /// Most recently abandoned first.
    async fn list_abandoned(&self, limit: usize) -> Result<Vec<AbandonedEntry>>;

    async fn purge_abandoned(&self) -> Result<usize>;

    async fn counts(&self) -> Result<QueueCounts>;
}

const GATE_OPEN: u8 = 0;
const GATE_COMMITTING: u8 = 1;
const GATE_CANCELLED: u8 = 2;

/// Single commit point shared by a write running elsewhere and the caller
/// waiting on it. At most one of [`try_commit`](Self::try_commit) and
/// [`try_cancel`](Self::try_cancel) succeeds.
#[derive(Debug, Clone, Default)]
pub(crate) struct CommitGate(Arc<AtomicU8>);

impl CommitGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn try_commit(&self) -> bool {
        self.transition(GATE_COMMITTING)
    }

    pub(crate) fn try_cancel(&self) -> bool {
        self.transition(GATE_CANCELLED)
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire) == GATE_CANCELLED
    }

    fn transition(&self, to: u8) -> bool {
        self.0
            .compare_exchange(GATE_OPEN, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

fn timed_out(operation: &str, timeout: Duration) -> FieldSyncError {
    FieldSyncError::Timeout(format!(
        "{operation} did not finish within {} ms",
        timeout.as_millis()
    ))
}

#[cfg(test)]
mod tests;
