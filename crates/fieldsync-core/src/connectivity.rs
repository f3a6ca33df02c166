use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    pub const fn from_online(online: bool) -> Self {
        if online { Self::Online } else { Self::Offline }
    }

    pub const fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityTransition {
    pub from: Connectivity,
    pub to: Connectivity,
}

impl ConnectivityTransition {
    pub const fn is_reconnect(self) -> bool {
        matches!(
            (self.from, self.to),
            (Connectivity::Offline, Connectivity::Online)
        )
    }
}

/// Shared online/offline flag.
///
/// Written only by the network observer via [`ConnectivityState::set`]; read
/// synchronously by the manager on every intent. Clones share the same flag.
#[derive(Debug, Clone)]
pub struct ConnectivityState {
    tx: Arc<watch::Sender<Connectivity>>,
}

impl ConnectivityState {
    pub fn new(initial: Connectivity) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Connectivity {
        *self.tx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.current().is_online()
    }

    /// Stores the new state and returns the transition when it differs from
    /// the previous one. Repeated reports of the same state are ignored.
    pub fn set(&self, next: Connectivity) -> Option<ConnectivityTransition> {
        let previous = self.tx.send_replace(next);
        (previous != next).then_some(ConnectivityTransition {
            from: previous,
            to: next,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivityState {
    fn default() -> Self {
        Self::new(Connectivity::Online)
    }
}
