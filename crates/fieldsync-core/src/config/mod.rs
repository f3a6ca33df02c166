use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FieldSyncError, Result};

mod env;

pub const CONFIG_PATH_ENV: &str = "FIELDSYNC_CONFIG";
pub const QUEUEABLE_ENV: &str = "FIELDSYNC_QUEUEABLE";
pub const CACHEABLE_ENV: &str = "FIELDSYNC_CACHEABLE";
pub const ATTEMPT_CEILING_ENV: &str = "FIELDSYNC_REPLAY_ATTEMPT_CEILING";
pub const RETRY_WHILE_ONLINE_ENV: &str = "FIELDSYNC_RETRY_WHILE_ONLINE";
pub const BACKOFF_CAP_SECS_ENV: &str = "FIELDSYNC_BACKOFF_CAP_SECS";
pub const WRITE_TIMEOUT_MS_ENV: &str = "FIELDSYNC_WRITE_TIMEOUT_MS";

const DEFAULT_QUEUEABLE: &[&str] = &[
    "orders.create",
    "orders.updateStatus",
    "products.create",
    "products.update",
    "chat.sendMessage",
    "profile.update",
];

const DEFAULT_CACHEABLE: &[&str] = &[
    "orders.setAll",
    "products.setAll",
    "chat.setConversations",
    "profile.set",
];

const DEFAULT_ATTEMPT_CEILING: u32 = 3;
const DEFAULT_BACKOFF_CAP_SECS: u64 = 60;
const DEFAULT_WRITE_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FieldSyncConfig {
    pub classifier: ClassifierConfig,
    pub replay: ReplayConfig,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifierConfig {
    pub queueable: Vec<String>,
    pub cacheable: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            queueable: DEFAULT_QUEUEABLE.iter().map(ToString::to_string).collect(),
            cacheable: DEFAULT_CACHEABLE.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReplayConfig {
    /// Failed replays allowed before an entry is abandoned. An entry is
    /// dropped once its attempt count exceeds this value.
    pub attempt_ceiling: u32,
    /// Re-trigger a halted drain after a backoff while still online.
    pub retry_while_online: bool,
    pub backoff_cap_secs: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            attempt_ceiling: DEFAULT_ATTEMPT_CEILING,
            retry_while_online: false,
            backoff_cap_secs: DEFAULT_BACKOFF_CAP_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PersistenceConfig {
    pub write_timeout_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
        }
    }
}

impl PersistenceConfig {
    pub fn write_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.write_timeout_ms.max(1))
    }
}

impl FieldSyncConfig {
    /// Defaults, then the file named by `FIELDSYNC_CONFIG` (if any), then
    /// individual env overrides.
    pub fn from_env() -> Result<Self> {
        let base = match env::read_non_empty_env(CONFIG_PATH_ENV) {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        base.with_env_overrides().validated()
    }

    /// Like [`Self::from_env`] but with an explicit file taking precedence over
    /// `FIELDSYNC_CONFIG`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_toml_file(path)?
                .with_env_overrides()
                .validated(),
            None => Self::from_env(),
        }
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            FieldSyncError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str::<Self>(raw)
            .map_err(|err| FieldSyncError::Config(err.to_string()))?
            .validated()
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| FieldSyncError::Config(err.to_string()))
    }

    fn with_env_overrides(mut self) -> Self {
        if let Some(list) = env::read_env_list(QUEUEABLE_ENV) {
            self.classifier.queueable = list;
        }
        if let Some(list) = env::read_env_list(CACHEABLE_ENV) {
            self.classifier.cacheable = list;
        }
        if let Some(value) = env::read_env_u32(ATTEMPT_CEILING_ENV) {
            self.replay.attempt_ceiling = value;
        }
        if let Some(value) = env::read_env_bool(RETRY_WHILE_ONLINE_ENV) {
            self.replay.retry_while_online = value;
        }
        if let Some(value) = env::read_env_u64(BACKOFF_CAP_SECS_ENV) {
            self.replay.backoff_cap_secs = value;
        }
        if let Some(value) = env::read_env_u64(WRITE_TIMEOUT_MS_ENV) {
            self.persistence.write_timeout_ms = value;
        }
        self
    }

    pub fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        let blank = self
            .classifier
            .queueable
            .iter()
            .chain(&self.classifier.cacheable)
            .any(|name| name.trim().is_empty());
        if blank {
            return Err(FieldSyncError::Config(
                "intent names must not be blank".to_string(),
            ));
        }
        if let Some(name) = self
            .classifier
            .queueable
            .iter()
            .find(|name| self.classifier.cacheable.contains(name))
        {
            return Err(FieldSyncError::Config(format!(
                "intent `{name}` is listed as both queueable and cacheable"
            )));
        }
        if self.persistence.write_timeout_ms == 0 {
            return Err(FieldSyncError::Config(
                "persistence.write_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
