use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::QueueEntry;

/// A named request to change or read application state, as dispatched by the
/// host UI layer. Never mutated by this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub issued_at: DateTime<Utc>,
}

impl Intent {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
            issued_at: Utc::now(),
        }
    }

    /// Rebuilds the intent a queue entry was captured from.
    pub fn from_entry(entry: &QueueEntry) -> Self {
        Self {
            name: entry.name.clone(),
            payload: entry.payload.clone(),
            issued_at: entry.queued_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Queueable,
    Cacheable,
    PassThrough,
}

impl Classification {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queueable => "queueable",
            Self::Cacheable => "cacheable",
            Self::PassThrough => "pass_through",
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
