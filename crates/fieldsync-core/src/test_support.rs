use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::dispatch::Dispatcher;
use crate::error::{FieldSyncError, Result};
use crate::models::{
    AbandonedEntry, AbandonedNotice, CacheEntry, Intent, PersistenceFailure, QueueCounts,
    QueueEntry,
};
use crate::observability::ObservabilityHook;
use crate::store::{DurableStore, MemoryDurableStore};

/// Records every dispatched intent; fails intents whose `payload.id` has
/// remaining scripted failures.
#[derive(Debug, Default)]
pub(crate) struct ScriptedDispatcher {
    dispatched: Mutex<Vec<Intent>>,
    failures: Mutex<HashMap<String, u32>>,
    delay: Option<Duration>,
}

impl ScriptedDispatcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub(crate) fn fail_times(&self, id: &str, times: u32) {
        self.failures
            .lock()
            .expect("failures lock")
            .insert(id.to_string(), times);
    }

    pub(crate) fn dispatched_ids(&self) -> Vec<String> {
        self.dispatched
            .lock()
            .expect("dispatched lock")
            .iter()
            .map(|intent| payload_id(intent).unwrap_or_default())
            .collect()
    }

    pub(crate) fn dispatched(&self) -> Vec<Intent> {
        self.dispatched.lock().expect("dispatched lock").clone()
    }
}

fn payload_id(intent: &Intent) -> Option<String> {
    intent
        .payload
        .get("id")
        .and_then(|value| value.as_str())
        .map(ToString::to_string)
}

#[async_trait]
impl Dispatcher for ScriptedDispatcher {
    async fn dispatch(&self, intent: &Intent) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.dispatched
            .lock()
            .expect("dispatched lock")
            .push(intent.clone());

        let id = payload_id(intent).unwrap_or_default();
        let mut failures = self.failures.lock().expect("failures lock");
        if let Some(remaining) = failures.get_mut(&id)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(FieldSyncError::Dispatch(format!("{id} rejected")));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingHook {
    failures: Mutex<Vec<PersistenceFailure>>,
    abandoned: Mutex<Vec<AbandonedNotice>>,
    replayed: Mutex<Vec<i64>>,
}

impl RecordingHook {
    pub(crate) fn failures(&self) -> Vec<PersistenceFailure> {
        self.failures.lock().expect("failures lock").clone()
    }

    pub(crate) fn abandoned(&self) -> Vec<AbandonedNotice> {
        self.abandoned.lock().expect("abandoned lock").clone()
    }

    pub(crate) fn replayed(&self) -> Vec<i64> {
        self.replayed.lock().expect("replayed lock").clone()
    }
}

impl ObservabilityHook for RecordingHook {
    fn persistence_failed(&self, failure: &PersistenceFailure) {
        self.failures
            .lock()
            .expect("failures lock")
            .push(failure.clone());
    }

    fn entry_abandoned(&self, notice: &AbandonedNotice) {
        self.abandoned
            .lock()
            .expect("abandoned lock")
            .push(notice.clone());
    }

    fn entry_replayed(&self, entry: &QueueEntry) {
        self.replayed.lock().expect("replayed lock").push(entry.id);
    }
}

/// Memory store with switchable failure injection per operation.
#[derive(Debug, Default)]
pub(crate) struct FlakyStore {
    inner: MemoryDurableStore,
    pub(crate) fail_append: AtomicBool,
    pub(crate) hang_append: AtomicBool,
    pub(crate) fail_set: AtomicBool,
    pub(crate) fail_remove: AtomicBool,
    pub(crate) fail_record_attempt: AtomicBool,
    pub(crate) fail_record_abandoned: AtomicBool,
    pub(crate) read_calls: AtomicUsize,
}

impl FlakyStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn check(flag: &AtomicBool, operation: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            Err(FieldSyncError::Persistence(format!("injected {operation} failure")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DurableStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.inner.get(key).await
    }

    async fn set(&self, entry: CacheEntry) -> Result<()> {
        Self::check(&self.fail_set, "set")?;
        self.inner.set(entry).await
    }

    async fn list_cache_keys(&self) -> Result<Vec<String>> {
        self.inner.list_cache_keys().await
    }

    async fn append_to_queue(
        &self,
        name: &str,
        payload: &serde_json::Value,
        queued_at: DateTime<Utc>,
    ) -> Result<QueueEntry> {
        if self.hang_append.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Self::check(&self.fail_append, "append")?;
        self.inner.append_to_queue(name, payload, queued_at).await
    }

    async fn read_queue(&self) -> Result<Vec<QueueEntry>> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.read_queue().await
    }

    async fn record_attempt(&self, id: i64, error: &str) -> Result<u32> {
        Self::check(&self.fail_record_attempt, "record_attempt")?;
        self.inner.record_attempt(id, error).await
    }

    async fn remove_from_queue(&self, id: i64) -> Result<bool> {
        Self::check(&self.fail_remove, "remove")?;
        self.inner.remove_from_queue(id).await
    }

    async fn record_abandoned(&self, abandoned: &AbandonedEntry) -> Result<()> {
        Self::check(&self.fail_record_abandoned, "record_abandoned")?;
        self.inner.record_abandoned(abandoned).await
    }

    async fn list_abandoned(&self, limit: usize) -> Result<Vec<AbandonedEntry>> {
        self.inner.list_abandoned(limit).await
    }

    async fn purge_abandoned(&self) -> Result<usize> {
        self.inner.purge_abandoned().await
    }

    async fn counts(&self) -> Result<QueueCounts> {
        self.inner.counts().await
    }
}
