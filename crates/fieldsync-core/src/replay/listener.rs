use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::connectivity::{Connectivity, ConnectivityState, ConnectivityTransition};

use super::ReplayDriver;

/// Watches `connectivity` and starts a drain on every offline to online
/// transition. Other transitions are ignored.
///
/// The task ends once every [`ConnectivityState`] clone has been dropped;
/// abort the handle to stop it earlier.
pub fn spawn_reconnect_listener(
    driver: Arc<ReplayDriver>,
    connectivity: &ConnectivityState,
) -> JoinHandle<()> {
    let mut rx = connectivity.subscribe();
    let mut previous = *rx.borrow_and_update();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let current = *rx.borrow_and_update();
            let transition = ConnectivityTransition {
                from: previous,
                to: current,
            };
            previous = current;
            if transition.is_reconnect() {
                tracing::debug!("connectivity restored; starting drain");
                tokio::spawn(drain_after_reconnect(Arc::clone(&driver), rx.clone()));
            }
        }
        tracing::debug!("connectivity source dropped; reconnect listener stopped");
    })
}

async fn drain_after_reconnect(driver: Arc<ReplayDriver>, mut rx: watch::Receiver<Connectivity>) {
    let policy = driver.policy();
    let mut retries = 0_u32;
    loop {
        let outcome = driver.on_reconnect().await;
        let Some(report) = outcome.report().filter(|report| report.halted) else {
            return;
        };
        let online = rx.borrow().is_online();
        if !policy.retry_while_online || !online {
            return;
        }

        retries = retries.saturating_add(1);
        let delay = policy.retry_backoff(retries, report.halted_entry_id.unwrap_or_default());
        tracing::debug!(
            retries,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "drain halted while online; retrying after backoff"
        );
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            changed = rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }

        let online = rx.borrow().is_online();
        if !online {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::json;

    use crate::replay::ReplayPolicy;
    use crate::store::DurableStore;
    use crate::test_support::{FlakyStore, RecordingHook, ScriptedDispatcher};

    use super::*;

    async fn wait_for_empty_queue(store: &FlakyStore) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !store.read_queue().await.expect("read").is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("queue drained");
    }

    fn driver(
        store: Arc<FlakyStore>,
        dispatcher: Arc<ScriptedDispatcher>,
        policy: ReplayPolicy,
    ) -> Arc<ReplayDriver> {
        Arc::new(ReplayDriver::new(
            store,
            dispatcher,
            Arc::new(RecordingHook::default()),
            policy,
        ))
    }

    #[tokio::test]
    async fn reconnect_transition_triggers_drain() {
        let store = Arc::new(FlakyStore::new());
        store
            .append_to_queue("orders.create", &json!({"id": "A"}), Utc::now())
            .await
            .expect("append");
        let dispatcher = Arc::new(ScriptedDispatcher::new());
        let connectivity = ConnectivityState::new(Connectivity::Offline);
        let handle = spawn_reconnect_listener(
            driver(store.clone(), dispatcher.clone(), ReplayPolicy::default()),
            &connectivity,
        );

        connectivity.set(Connectivity::Online);
        wait_for_empty_queue(&store).await;
        assert_eq!(dispatcher.dispatched_ids(), vec!["A"]);
        handle.abort();
    }

    #[tokio::test]
    async fn going_offline_does_not_drain() {
        let store = Arc::new(FlakyStore::new());
        let connectivity = ConnectivityState::new(Connectivity::Online);
        let handle = spawn_reconnect_listener(
            driver(
                store.clone(),
                Arc::new(ScriptedDispatcher::new()),
                ReplayPolicy::default(),
            ),
            &connectivity,
        );

        connectivity.set(Connectivity::Offline);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.read_calls.load(Ordering::SeqCst), 0);
        handle.abort();
    }

    #[tokio::test]
    async fn listener_stops_when_connectivity_is_dropped() {
        let connectivity = ConnectivityState::new(Connectivity::Offline);
        let handle = spawn_reconnect_listener(
            driver(
                Arc::new(FlakyStore::new()),
                Arc::new(ScriptedDispatcher::new()),
                ReplayPolicy::default(),
            ),
            &connectivity,
        );
        drop(connectivity);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("listener exits")
            .expect("join");
    }

    #[tokio::test]
    async fn halted_drain_is_retried_while_online_when_enabled() {
        let store = Arc::new(FlakyStore::new());
        for id in ["A", "B"] {
            store
                .append_to_queue("orders.create", &json!({"id": id}), Utc::now())
                .await
                .expect("append");
        }
        let dispatcher = Arc::new(ScriptedDispatcher::new());
        dispatcher.fail_times("A", 1);
        let policy = ReplayPolicy {
            attempt_ceiling: 3,
            retry_while_online: true,
            backoff_cap_secs: 1,
        };
        let connectivity = ConnectivityState::new(Connectivity::Offline);
        let handle = spawn_reconnect_listener(
            driver(store.clone(), dispatcher.clone(), policy),
            &connectivity,
        );

        connectivity.set(Connectivity::Online);
        wait_for_empty_queue(&store).await;
        assert_eq!(dispatcher.dispatched_ids(), vec!["A", "A", "B"]);
        handle.abort();
    }
}
