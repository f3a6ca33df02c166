//! Reporting for failures the offline pipeline recovers from locally.
//!
//! Persistence errors never propagate into the dispatch path; they are handed
//! to an [`ObservabilityHook`] instead. Abandoned queue entries go through the
//! same hook so the host can surface a non-blocking notification.

use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use crate::models::{AbandonedNotice, Notice, PersistenceFailure, QueueEntry};

pub const LOG_FILTER_ENV: &str = "FIELDSYNC_LOG";
const DEFAULT_NOTICE_CAPACITY: usize = 64;

pub trait ObservabilityHook: Send + Sync {
    fn persistence_failed(&self, failure: &PersistenceFailure);

    fn entry_abandoned(&self, notice: &AbandonedNotice);

    fn entry_replayed(&self, _entry: &QueueEntry) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingHook;

impl ObservabilityHook for TracingHook {
    fn persistence_failed(&self, failure: &PersistenceFailure) {
        tracing::warn!(
            operation = failure.operation.as_str(),
            intent = %failure.intent_name,
            entry_id = ?failure.entry_id,
            error = %failure.message,
            "offline persistence failed; continuing without it"
        );
    }

    fn entry_abandoned(&self, notice: &AbandonedNotice) {
        tracing::error!(
            intent = %notice.entry.name,
            entry_id = notice.entry.id,
            attempts = notice.entry.attempts,
            error = %notice.last_error,
            "queued intent abandoned after exhausting replay attempts"
        );
    }

    fn entry_replayed(&self, entry: &QueueEntry) {
        tracing::debug!(
            intent = %entry.name,
            entry_id = entry.id,
            attempts = entry.attempts,
            "queued intent replayed"
        );
    }
}

/// Logs like [`TracingHook`] and fans every notice out to subscribers.
///
/// Slow subscribers lose the oldest notices rather than blocking the
/// pipeline.
#[derive(Debug, Clone)]
pub struct BroadcastHook {
    tx: broadcast::Sender<Notice>,
}

impl BroadcastHook {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    fn publish(&self, notice: Notice) {
        // No subscribers is fine; the log line above still records it.
        let _ = self.tx.send(notice);
    }
}

impl Default for BroadcastHook {
    fn default() -> Self {
        Self::new(DEFAULT_NOTICE_CAPACITY)
    }
}

impl ObservabilityHook for BroadcastHook {
    fn persistence_failed(&self, failure: &PersistenceFailure) {
        TracingHook.persistence_failed(failure);
        self.publish(Notice::PersistenceFailed(failure.clone()));
    }

    fn entry_abandoned(&self, notice: &AbandonedNotice) {
        TracingHook.entry_abandoned(notice);
        self.publish(Notice::Abandoned(notice.clone()));
    }

    fn entry_replayed(&self, entry: &QueueEntry) {
        TracingHook.entry_replayed(entry);
    }
}

/// Installs a stderr `fmt` subscriber filtered by `FIELDSYNC_LOG`, falling
/// back to `default_filter`. Safe to call more than once.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
