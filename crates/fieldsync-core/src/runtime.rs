use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::classifier::{ActionClassifier, cache_key_for};
use crate::config::FieldSyncConfig;
use crate::connectivity::{Connectivity, ConnectivityState, ConnectivityTransition};
use crate::dispatch::{Dispatcher, InterceptingDispatcher};
use crate::error::Result;
use crate::manager::{DisconnectedOperationManager, Intercepted};
use crate::models::{
    AbandonedEntry, CacheEntry, Classification, DrainOutcome, Intent, Notice, QueueCounts,
    QueueEntry,
};
use crate::observability::{BroadcastHook, ObservabilityHook};
use crate::replay::{ReplayDriver, ReplayPolicy, spawn_reconnect_listener};
use crate::store::{DurableStore, MemoryDurableStore, SqliteDurableStore};

pub const STATE_DB_FILE: &str = ".fieldsync_state.sqlite3";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectivityChange {
    pub connectivity: Connectivity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<ConnectivityTransition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drain: Option<DrainOutcome>,
}

/// Everything a host needs to run offline: classifier, connectivity flag,
/// durable store, interception manager and replay driver, wired to one
/// notice channel.
pub struct FieldSync {
    config: FieldSyncConfig,
    connectivity: ConnectivityState,
    store: Arc<dyn DurableStore>,
    manager: Arc<DisconnectedOperationManager>,
    replay: Arc<ReplayDriver>,
    notices: BroadcastHook,
}

impl std::fmt::Debug for FieldSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldSync")
            .field("config", &self.config)
            .field("connectivity", &self.connectivity.current())
            .finish_non_exhaustive()
    }
}

impl FieldSync {
    /// Opens (or creates) the SQLite state under `root`.
    ///
    /// `dispatcher` is used for replay only and must reach the backend
    /// directly.
    pub fn open(
        root: impl AsRef<Path>,
        config: FieldSyncConfig,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        let store = SqliteDurableStore::open(root.join(STATE_DB_FILE))?;
        Self::with_store(config, Arc::new(store), dispatcher)
    }

    pub fn in_memory(config: FieldSyncConfig, dispatcher: Arc<dyn Dispatcher>) -> Result<Self> {
        Self::with_store(config, Arc::new(MemoryDurableStore::new()), dispatcher)
    }

    pub fn with_store(
        config: FieldSyncConfig,
        store: Arc<dyn DurableStore>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self> {
        config.validate()?;
        let classifier = Arc::new(ActionClassifier::from_config(&config.classifier)?);
        let connectivity = ConnectivityState::default();
        let notices = BroadcastHook::default();
        let hook: Arc<dyn ObservabilityHook> = Arc::new(notices.clone());

        let manager = Arc::new(DisconnectedOperationManager::new(
            classifier,
            connectivity.clone(),
            Arc::clone(&store),
            Arc::clone(&hook),
            config.persistence.write_timeout(),
        )?);
        let replay = Arc::new(ReplayDriver::new(
            Arc::clone(&store),
            dispatcher,
            hook,
            ReplayPolicy::from_config(&config.replay),
        ));

        Ok(Self {
            config,
            connectivity,
            store,
            manager,
            replay,
            notices,
        })
    }

    pub fn config(&self) -> &FieldSyncConfig {
        &self.config
    }

    pub fn classify(&self, name: &str) -> Classification {
        self.manager.classifier().classify(name)
    }

    pub fn connectivity(&self) -> Connectivity {
        self.connectivity.current()
    }

    pub fn connectivity_state(&self) -> &ConnectivityState {
        &self.connectivity
    }

    pub fn manager(&self) -> Arc<DisconnectedOperationManager> {
        Arc::clone(&self.manager)
    }

    pub fn replay_driver(&self) -> Arc<ReplayDriver> {
        Arc::clone(&self.replay)
    }

    /// Puts the manager in front of the host's dispatch path.
    pub fn pipeline<D: Dispatcher>(&self, downstream: D) -> InterceptingDispatcher<D> {
        InterceptingDispatcher::new(self.manager(), downstream)
    }

    pub async fn intercept(&self, intent: Intent) -> Intercepted {
        self.manager.intercept(intent).await
    }

    /// Records the observer's report. An offline to online transition runs a
    /// drain pass before returning.
    pub async fn set_connectivity(&self, next: Connectivity) -> ConnectivityChange {
        let transition = self.connectivity.set(next);
        let drain = match transition {
            Some(transition) if transition.is_reconnect() => Some(self.replay.on_reconnect().await),
            _ => None,
        };
        ConnectivityChange {
            connectivity: next,
            transition,
            drain,
        }
    }

    pub async fn drain(&self) -> DrainOutcome {
        self.replay.on_reconnect().await
    }

    pub fn spawn_reconnect_listener(&self) -> JoinHandle<()> {
        spawn_reconnect_listener(self.replay_driver(), &self.connectivity)
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub async fn flush(&self) -> Result<()> {
        self.manager.flush().await
    }

    pub async fn cached(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.store.get(key).await
    }

    pub async fn cached_for_intent(&self, name: &str) -> Result<Option<CacheEntry>> {
        self.store.get(&cache_key_for(name)).await
    }

    pub async fn cache_keys(&self) -> Result<Vec<String>> {
        self.store.list_cache_keys().await
    }

    pub async fn pending(&self) -> Result<Vec<QueueEntry>> {
        self.store.read_queue().await
    }

    pub async fn abandoned(&self, limit: usize) -> Result<Vec<AbandonedEntry>> {
        self.store.list_abandoned(limit).await
    }

    pub async fn purge_abandoned(&self) -> Result<usize> {
        self.store.purge_abandoned().await
    }

    pub async fn counts(&self) -> Result<QueueCounts> {
        self.store.counts().await
    }
}
