use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};

use crate::error::{FieldSyncError, Result};
use crate::models::{CacheEntry, PersistenceFailure, PersistenceOperation};
use crate::observability::ObservabilityHook;
use crate::store::DurableStore;

enum CacheCommand {
    Write {
        entry: CacheEntry,
        intent_name: String,
    },
    Flush(oneshot::Sender<()>),
}

/// Applies cache writes one at a time, in the order they were scheduled.
///
/// Scheduling never waits on the store. Failures are reported through the
/// hook and otherwise dropped.
#[derive(Debug, Clone)]
pub(crate) struct CacheWriter {
    tx: mpsc::UnboundedSender<CacheCommand>,
}

impl CacheWriter {
    pub(crate) fn spawn(
        runtime: &tokio::runtime::Handle,
        store: Arc<dyn DurableStore>,
        hook: Arc<dyn ObservabilityHook>,
        write_timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        runtime.spawn(run_cache_writer(rx, store, hook, write_timeout));
        Self { tx }
    }

    pub(crate) fn schedule(&self, entry: CacheEntry, intent_name: &str) -> Result<()> {
        self.tx
            .send(CacheCommand::Write {
                entry,
                intent_name: intent_name.to_string(),
            })
            .map_err(|_| FieldSyncError::Persistence("cache writer stopped".to_string()))
    }

    /// Resolves once every write scheduled before this call has been applied
    /// or reported.
    pub(crate) async fn flush(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(CacheCommand::Flush(done_tx))
            .map_err(|_| FieldSyncError::Persistence("cache writer stopped".to_string()))?;
        done_rx
            .await
            .map_err(|_| FieldSyncError::Persistence("cache writer stopped".to_string()))
    }
}

impl std::fmt::Debug for CacheCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Write { entry, .. } => f.debug_tuple("Write").field(&entry.key).finish(),
            Self::Flush(_) => f.write_str("Flush"),
        }
    }
}

async fn run_cache_writer(
    mut rx: mpsc::UnboundedReceiver<CacheCommand>,
    store: Arc<dyn DurableStore>,
    hook: Arc<dyn ObservabilityHook>,
    write_timeout: Duration,
) {
    while let Some(command) = rx.recv().await {
        match command {
            CacheCommand::Write { entry, intent_name } => {
                let key = entry.key.clone();
                // A timed-out write is rolled back by the store, so the next
                // write for the same key cannot be overtaken by it.
                match store.set_within(entry, write_timeout).await {
                    Ok(()) => {
                        tracing::debug!(intent = %intent_name, key = %key, "cache entry written");
                    }
                    Err(err) => hook.persistence_failed(&PersistenceFailure {
                        operation: PersistenceOperation::CacheWrite,
                        intent_name,
                        entry_id: None,
                        message: err.to_string(),
                        occurred_at: Utc::now(),
                    }),
                }
            }
            CacheCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}
