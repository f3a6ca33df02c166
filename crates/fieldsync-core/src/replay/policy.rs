use std::time::Duration;

use crate::config::ReplayConfig;

const MAX_BACKOFF_EXPONENT: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayPolicy {
    pub attempt_ceiling: u32,
    pub retry_while_online: bool,
    pub backoff_cap_secs: u64,
}

impl ReplayPolicy {
    pub fn from_config(config: &ReplayConfig) -> Self {
        Self {
            attempt_ceiling: config.attempt_ceiling,
            retry_while_online: config.retry_while_online,
            backoff_cap_secs: config.backoff_cap_secs,
        }
    }

    /// `attempts` is the count after recording the latest failure.
    pub fn should_abandon(&self, attempts: u32) -> bool {
        attempts > self.attempt_ceiling
    }

    /// Exponential delay before re-triggering a halted drain, capped at
    /// `backoff_cap_secs`, with jitter derived from the entry so retries of
    /// the same entry are reproducible.
    pub fn retry_backoff(&self, attempts: u32, entry_id: i64) -> Duration {
        let cap = self.backoff_cap_secs.max(1);
        let exponent = attempts.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        let baseline = (1_u64 << exponent).min(cap);
        let jitter_bound = (baseline / 4).max(1);
        let seed = format!("replay:{attempts}:{entry_id}");
        let hash = blake3::hash(seed.as_bytes());
        let bytes = hash.as_bytes();
        let rand = u64::from(u16::from_be_bytes([bytes[0], bytes[1]]));
        let jitter = rand % (jitter_bound + 1);
        Duration::from_secs((baseline + jitter).min(cap))
    }
}

impl Default for ReplayPolicy {
    fn default() -> Self {
        Self::from_config(&ReplayConfig::default())
    }
}
