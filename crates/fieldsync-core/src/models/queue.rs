use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A deferred intent held in the durable queue.
///
/// `id` is assigned by the store from a strictly increasing sequence and
/// defines replay order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: i64,
    pub name: String,
    pub payload: serde_json::Value,
    pub queued_at: DateTime<Utc>,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Dead-letter record for an entry that exhausted its replay attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbandonedEntry {
    pub entry: QueueEntry,
    pub last_error: String,
    pub abandoned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: u64,
    pub abandoned: u64,
    pub cached_keys: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_queued_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub fetched: usize,
    pub replayed: usize,
    pub abandoned: usize,
    pub halted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted_entry_id: Option<i64>,
    pub persistence_failures: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DrainOutcome {
    Completed(DrainReport),
    /// Another pass was already running; this trigger was dropped.
    Coalesced,
}

impl DrainOutcome {
    pub fn report(&self) -> Option<&DrainReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Coalesced => None,
        }
    }
}
