mod cache;
mod intent;
mod notice;
mod queue;

pub use cache::CacheEntry;
pub use intent::{Classification, Intent};
pub use notice::{AbandonedNotice, Notice, PersistenceFailure, PersistenceOperation};
pub use queue::{AbandonedEntry, DrainOutcome, DrainReport, QueueCounts, QueueEntry};
