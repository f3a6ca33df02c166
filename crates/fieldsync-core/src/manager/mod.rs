use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::classifier::{ActionClassifier, cache_key_for};
use crate::connectivity::{Connectivity, ConnectivityState};
use crate::error::{FieldSyncError, Result};
use crate::models::{CacheEntry, Classification, Intent, PersistenceFailure, PersistenceOperation};
use crate::observability::ObservabilityHook;
use crate::store::DurableStore;

mod cache_writer;

use cache_writer::CacheWriter;

/// Persistence side effect taken while intercepting one intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum InterceptEffect {
    Queued { entry_id: i64 },
    QueueFailed,
    CacheScheduled { key: String },
    CacheFailed,
    None,
}

/// Result of [`DisconnectedOperationManager::intercept`]. The intent is always
/// present and identical to the one passed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intercepted {
    pub intent: Intent,
    pub classification: Classification,
    pub connectivity: Connectivity,
    pub effect: InterceptEffect,
}

impl Intercepted {
    pub fn into_intent(self) -> Intent {
        self.intent
    }
}

/// Decides, per intent, whether to defer it to the durable queue (offline,
/// queueable), refresh the read cache (online, cacheable), or do nothing.
///
/// Interception never suppresses or alters an intent and never fails: store
/// errors are reported to the hook and the intent is forwarded regardless.
pub struct DisconnectedOperationManager {
    classifier: Arc<ActionClassifier>,
    connectivity: ConnectivityState,
    store: Arc<dyn DurableStore>,
    hook: Arc<dyn ObservabilityHook>,
    cache_writer: CacheWriter,
    write_timeout: Duration,
}

impl std::fmt::Debug for DisconnectedOperationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisconnectedOperationManager")
            .field("connectivity", &self.connectivity.current())
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

impl DisconnectedOperationManager {
    /// Must be called from within a tokio runtime; the cache writer task is
    /// spawned onto it.
    pub fn new(
        classifier: Arc<ActionClassifier>,
        connectivity: ConnectivityState,
        store: Arc<dyn DurableStore>,
        hook: Arc<dyn ObservabilityHook>,
        write_timeout: Duration,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            FieldSyncError::Internal("manager requires a running tokio runtime".to_string())
        })?;
        let cache_writer = CacheWriter::spawn(
            &runtime,
            Arc::clone(&store),
            Arc::clone(&hook),
            write_timeout,
        );
        Ok(Self {
            classifier,
            connectivity,
            store,
            hook,
            cache_writer,
            write_timeout,
        })
    }

    pub fn classifier(&self) -> &ActionClassifier {
        &self.classifier
    }

    pub fn connectivity(&self) -> &ConnectivityState {
        &self.connectivity
    }

    pub async fn intercept(&self, intent: Intent) -> Intercepted {
        let connectivity = self.connectivity.current();
        let classification = self.classifier.classify(&intent.name);

        let effect = match (connectivity, classification) {
            (Connectivity::Offline, Classification::Queueable) => self.enqueue(&intent).await,
            (Connectivity::Online, Classification::Cacheable) => self.schedule_cache_write(&intent),
            _ => InterceptEffect::None,
        };

        Intercepted {
            intent,
            classification,
            connectivity,
            effect,
        }
    }

    /// Waits for all cache writes scheduled so far.
    pub async fn flush(&self) -> Result<()> {
        self.cache_writer.flush().await
    }

    async fn enqueue(&self, intent: &Intent) -> InterceptEffect {
        let appended = self
            .store
            .append_to_queue_within(&intent.name, &intent.payload, Utc::now(), self.write_timeout)
            .await;
        match appended {
            Ok(entry) => {
                tracing::debug!(intent = %intent.name, entry_id = entry.id, "intent queued while offline");
                InterceptEffect::Queued { entry_id: entry.id }
            }
            Err(err) => {
                self.report(PersistenceOperation::QueueAppend, &intent.name, err.to_string());
                InterceptEffect::QueueFailed
            }
        }
    }

    fn schedule_cache_write(&self, intent: &Intent) -> InterceptEffect {
        let key = cache_key_for(&intent.name);
        let entry = CacheEntry::new(key.clone(), intent.payload.clone());
        match self.cache_writer.schedule(entry, &intent.name) {
            Ok(()) => InterceptEffect::CacheScheduled { key },
            Err(err) => {
                self.report(PersistenceOperation::CacheWrite, &intent.name, err.to_string());
                InterceptEffect::CacheFailed
            }
        }
    }

    fn report(&self, operation: PersistenceOperation, intent_name: &str, message: String) {
        self.hook.persistence_failed(&PersistenceFailure {
            operation,
            intent_name: intent_name.to_string(),
            entry_id: None,
            message,
            occurred_at: Utc::now(),
        });
    }
}
