use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::QueueEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceOperation {
    QueueAppend,
    QueueRead,
    QueueRemove,
    RecordAttempt,
    RecordAbandoned,
    CacheWrite,
}

impl PersistenceOperation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::QueueAppend => "queue_append",
            Self::QueueRead => "queue_read",
            Self::QueueRemove => "queue_remove",
            Self::RecordAttempt => "record_attempt",
            Self::RecordAbandoned => "record_abandoned",
            Self::CacheWrite => "cache_write",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceFailure {
    pub operation: PersistenceOperation,
    pub intent_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<i64>,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// Raised when a queued intent is dropped after exceeding the replay ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbandonedNotice {
    pub entry: QueueEntry,
    pub last_error: String,
    pub abandoned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    PersistenceFailed(PersistenceFailure),
    Abandoned(AbandonedNotice),
}
