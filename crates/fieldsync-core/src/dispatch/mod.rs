use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::manager::DisconnectedOperationManager;
use crate::models::Intent;

#[cfg(feature = "http-dispatch")]
mod http;

#[cfg(feature = "http-dispatch")]
pub use http::HttpDispatcher;

/// The host's intent handling path. `Ok` means the intent was applied.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, intent: &Intent) -> Result<()>;
}

#[async_trait]
impl<D> Dispatcher for Arc<D>
where
    D: Dispatcher + ?Sized,
{
    async fn dispatch(&self, intent: &Intent) -> Result<()> {
        (**self).dispatch(intent).await
    }
}

/// Pipeline stage that runs every intent through the manager exactly once
/// and then hands it, unchanged, to `inner`.
pub struct InterceptingDispatcher<D> {
    manager: Arc<DisconnectedOperationManager>,
    inner: D,
}

impl<D> InterceptingDispatcher<D> {
    pub fn new(manager: Arc<DisconnectedOperationManager>, inner: D) -> Self {
        Self { manager, inner }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }
}

#[async_trait]
impl<D> Dispatcher for InterceptingDispatcher<D>
where
    D: Dispatcher,
{
    async fn dispatch(&self, intent: &Intent) -> Result<()> {
        let forwarded = self.manager.intercept(intent.clone()).await.into_intent();
        self.inner.dispatch(&forwarded).await
    }
}
