// Public fallible APIs in this crate share one concrete error contract (`FieldSyncError`).
// Repeating per-function `# Errors` boilerplate obscures behavior more than it clarifies.
#![allow(
    clippy::missing_errors_doc,
    reason = "crate-wide fallible API uses one explicit error type; per-item boilerplate would duplicate contract"
)]

pub mod classifier;
pub mod config;
pub mod connectivity;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod models;
pub mod observability;
pub mod replay;
pub mod runtime;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use classifier::{ActionClassifier, cache_key_for};
pub use config::FieldSyncConfig;
pub use connectivity::{Connectivity, ConnectivityState, ConnectivityTransition};
pub use dispatch::{Dispatcher, InterceptingDispatcher};
#[cfg(feature = "http-dispatch")]
pub use dispatch::HttpDispatcher;
pub use error::{ErrorPayload, FieldSyncError, Result};
pub use manager::{DisconnectedOperationManager, InterceptEffect, Intercepted};
pub use models::{Classification, DrainOutcome, DrainReport, Intent, Notice, QueueEntry};
pub use observability::{BroadcastHook, ObservabilityHook, TracingHook, init_tracing};
pub use replay::{ReplayDriver, ReplayPolicy};
pub use runtime::{ConnectivityChange, FieldSync, STATE_DB_FILE};
pub use store::{DurableStore, MemoryDurableStore, SqliteDurableStore};
