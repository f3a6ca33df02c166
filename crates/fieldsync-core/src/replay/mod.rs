//! Drains the offline queue after connectivity returns.
//!
//! A pass walks a FIFO snapshot of the queue and re-dispatches each entry.
//! Successful entries are removed. A failed entry has its attempt count
//! bumped; below the ceiling it stays put and the pass stops so nothing later
//! is applied ahead of it, above the ceiling it is moved to the dead-letter
//! table and the pass moves on.
//!
//! Any store write the pass depends on failing also stops it. An entry left
//! over the ceiling by such a stop is dead-lettered by the next pass without
//! being dispatched again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::Utc;

use crate::dispatch::Dispatcher;
use crate::error::FieldSyncError;
use crate::models::{
    AbandonedEntry, AbandonedNotice, DrainOutcome, DrainReport, Intent, PersistenceFailure,
    PersistenceOperation, QueueEntry,
};
use crate::observability::ObservabilityHook;
use crate::store::DurableStore;

mod listener;
mod policy;

pub use listener::spawn_reconnect_listener;
pub use policy::ReplayPolicy;

pub struct ReplayDriver {
    store: Arc<dyn DurableStore>,
    dispatcher: Arc<dyn Dispatcher>,
    hook: Arc<dyn ObservabilityHook>,
    policy: ReplayPolicy,
    draining: AtomicBool,
}

impl std::fmt::Debug for ReplayDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayDriver")
            .field("policy", &self.policy)
            .field("draining", &self.is_draining())
            .finish_non_exhaustive()
    }
}

/// Clears the draining flag when a pass ends, including on panic.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum EntryStep {
    Continue,
    Halt,
}

impl ReplayDriver {
    /// `dispatcher` must be the downstream path itself, not a pipeline that
    /// runs through the manager, or replayed intents would be queued again.
    pub fn new(
        store: Arc<dyn DurableStore>,
        dispatcher: Arc<dyn Dispatcher>,
        hook: Arc<dyn ObservabilityHook>,
        policy: ReplayPolicy,
    ) -> Self {
        Self {
            store,
            dispatcher,
            hook,
            policy,
            draining: AtomicBool::new(false),
        }
    }

    pub fn policy(&self) -> ReplayPolicy {
        self.policy
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Runs one drain pass unless one is already in flight, in which case the
    /// trigger is dropped and `Coalesced` is returned.
    pub async fn on_reconnect(&self) -> DrainOutcome {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("drain already in progress; coalescing reconnect trigger");
            return DrainOutcome::Coalesced;
        }
        let _guard = DrainGuard(&self.draining);
        DrainOutcome::Completed(self.drain_pass().await)
    }

    async fn drain_pass(&self) -> DrainReport {
        let started = Instant::now();
        let mut report = DrainReport::default();

        let entries = match self.store.read_queue().await {
            Ok(entries) => entries,
            Err(err) => {
                self.report_failure(PersistenceOperation::QueueRead, None, err.to_string());
                report.persistence_failures += 1;
                report.halted = true;
                return report;
            }
        };
        report.fetched = entries.len();

        for entry in entries {
            if let EntryStep::Halt = self.replay_entry(entry, &mut report).await {
                report.halted = true;
                break;
            }
        }

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        if report.halted {
            tracing::warn!(
                fetched = report.fetched,
                replayed = report.replayed,
                abandoned = report.abandoned,
                halted_entry_id = ?report.halted_entry_id,
                elapsed_ms,
                "drain pass halted"
            );
        } else {
            tracing::info!(
                fetched = report.fetched,
                replayed = report.replayed,
                abandoned = report.abandoned,
                elapsed_ms,
                "drain pass completed"
            );
        }
        report
    }

    async fn replay_entry(&self, entry: QueueEntry, report: &mut DrainReport) -> EntryStep {
        // Over the ceiling already: an earlier pass decided to abandon it but
        // could not finish. Finish that without dispatching again.
        if self.policy.should_abandon(entry.attempts) {
            let last_error = entry
                .last_error
                .clone()
                .unwrap_or_else(|| "attempt ceiling exceeded".to_string());
            let attempts = entry.attempts;
            return self.abandon(entry, attempts, last_error, report).await;
        }

        let intent = Intent::from_entry(&entry);
        let dispatch_error = match self.dispatcher.dispatch(&intent).await {
            Ok(()) => None,
            Err(err) => Some(err.to_string()),
        };

        let Some(error) = dispatch_error else {
            return match self.store.remove_from_queue(entry.id).await {
                Ok(_) => {
                    report.replayed += 1;
                    self.hook.entry_replayed(&entry);
                    EntryStep::Continue
                }
                Err(err) => {
                    self.halt_on_store_error(PersistenceOperation::QueueRemove, &entry, &err, report)
                }
            };
        };

        let attempts = match self.store.record_attempt(entry.id, &error).await {
            Ok(attempts) => attempts,
            Err(err) => {
                return self.halt_on_store_error(
                    PersistenceOperation::RecordAttempt,
                    &entry,
                    &err,
                    report,
                );
            }
        };

        if !self.policy.should_abandon(attempts) {
            tracing::warn!(
                intent = %entry.name,
                entry_id = entry.id,
                attempts,
                ceiling = self.policy.attempt_ceiling,
                error = %error,
                "replay failed; halting drain until next trigger"
            );
            report.halted_entry_id = Some(entry.id);
            return EntryStep::Halt;
        }

        self.abandon(entry, attempts, error, report).await
    }

    /// Dead-letters the entry, then removes it from the queue. Either step
    /// failing halts the pass with the entry still at the head of the queue.
    async fn abandon(
        &self,
        mut entry: QueueEntry,
        attempts: u32,
        last_error: String,
        report: &mut DrainReport,
    ) -> EntryStep {
        entry.attempts = attempts;
        entry.last_error = Some(last_error.clone());
        let abandoned = AbandonedEntry {
            entry,
            last_error,
            abandoned_at: Utc::now(),
        };

        if let Err(err) = self.store.record_abandoned(&abandoned).await {
            return self.halt_on_store_error(
                PersistenceOperation::RecordAbandoned,
                &abandoned.entry,
                &err,
                report,
            );
        }
        if let Err(err) = self.store.remove_from_queue(abandoned.entry.id).await {
            return self.halt_on_store_error(
                PersistenceOperation::QueueRemove,
                &abandoned.entry,
                &err,
                report,
            );
        }

        report.abandoned += 1;
        self.hook.entry_abandoned(&AbandonedNotice {
            entry: abandoned.entry,
            last_error: abandoned.last_error,
            abandoned_at: abandoned.abandoned_at,
        });
        EntryStep::Continue
    }

    fn halt_on_store_error(
        &self,
        operation: PersistenceOperation,
        entry: &QueueEntry,
        err: &FieldSyncError,
        report: &mut DrainReport,
    ) -> EntryStep {
        self.report_failure(operation, Some(entry), err.to_string());
        report.persistence_failures += 1;
        report.halted_entry_id = Some(entry.id);
        EntryStep::Halt
    }

    fn report_failure(
        &self,
        operation: PersistenceOperation,
        entry: Option<&QueueEntry>,
        message: String,
    ) {
        self.hook.persistence_failed(&PersistenceFailure {
            operation,
            intent_name: entry.map(|entry| entry.name.clone()).unwrap_or_default(),
            entry_id: entry.map(|entry| entry.id),
            message,
            occurred_at: Utc::now(),
        });
    }
}
