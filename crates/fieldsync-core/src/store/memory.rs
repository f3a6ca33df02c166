use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::{FieldSyncError, Result};
use crate::models::{AbandonedEntry, CacheEntry, QueueCounts, QueueEntry};

use super::DurableStore;

/// Process-local store with the same ordering and overwrite rules as the
/// SQLite store. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryDurableStore {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    last_id: i64,
    queue: VecDeque<QueueEntry>,
    cache: BTreeMap<String, CacheEntry>,
    abandoned: Vec<AbandonedEntry>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.inner.lock().await.cache.get(key).cloned())
    }

    async fn set(&self, entry: CacheEntry) -> Result<()> {
        self.inner
            .lock()
            .await
            .cache
            .insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn list_cache_keys(&self) -> Result<Vec<String>> {
        Ok(self.inner.lock().await.cache.keys().cloned().collect())
    }

    async fn append_to_queue(
        &self,
        name: &str,
        payload: &serde_json::Value,
        queued_at: DateTime<Utc>,
    ) -> Result<QueueEntry> {
        let mut state = self.inner.lock().await;
        state.last_id += 1;
        let entry = QueueEntry {
            id: state.last_id,
            name: name.to_string(),
            payload: payload.clone(),
            queued_at,
            attempts: 0,
            last_error: None,
        };
        state.queue.push_back(entry.clone());
        Ok(entry)
    }

    async fn read_queue(&self) -> Result<Vec<QueueEntry>> {
        Ok(self.inner.lock().await.queue.iter().cloned().collect())
    }

    async fn record_attempt(&self, id: i64, error: &str) -> Result<u32> {
        let mut state = self.inner.lock().await;
        let entry = state
            .queue
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or_else(|| FieldSyncError::NotFound(format!("queue entry {id}")))?;
        entry.attempts = entry.attempts.saturating_add(1);
        entry.last_error = Some(error.to_string());
        Ok(entry.attempts)
    }

    async fn remove_from_queue(&self, id: i64) -> Result<bool> {
        let mut state = self.inner.lock().await;
        let before = state.queue.len();
        state.queue.retain(|entry| entry.id != id);
        Ok(state.queue.len() < before)
    }

    async fn record_abandoned(&self, abandoned: &AbandonedEntry) -> Result<()> {
        let mut state = self.inner.lock().await;
        state
            .abandoned
            .retain(|existing| existing.entry.id != abandoned.entry.id);
        state.abandoned.push(abandoned.clone());
        Ok(())
    }

    async fn list_abandoned(&self, limit: usize) -> Result<Vec<AbandonedEntry>> {
        let state = self.inner.lock().await;
        let mut out = state.abandoned.clone();
        out.sort_by(|a, b| {
            b.abandoned_at
                .cmp(&a.abandoned_at)
                .then_with(|| b.entry.id.cmp(&a.entry.id))
        });
        out.truncate(limit);
        Ok(out)
    }

    async fn purge_abandoned(&self) -> Result<usize> {
        let mut state = self.inner.lock().await;
        let removed = state.abandoned.len();
        state.abandoned.clear();
        Ok(removed)
    }

    async fn counts(&self) -> Result<QueueCounts> {
        let state = self.inner.lock().await;
        Ok(QueueCounts {
            pending: state.queue.len() as u64,
            abandoned: state.abandoned.len() as u64,
            cached_keys: state.cache.len() as u64,
            oldest_queued_at: state.queue.iter().map(|entry| entry.queued_at).min(),
        })
    }
}
