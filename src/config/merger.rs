// Configuration merging with priority

use crate::config::loader::{LockConfig, StoreConfig};
use serde::{Deserialize, Serialize};

/// Partial configuration for merging
/// Uses Option<T> for all fields to support partial overrides
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PartialConfig {
    #[serde(default)]
    pub servers: Option<Vec<String>>,
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub max_lifetime_secs: Option<u64>,
    #[serde(default)]
    pub gc_interval_secs: Option<u64>,
    #[serde(default)]
    pub lock: Option<PartialLockConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PartialLockConfig {
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub total_timeout_ms: Option<u64>,
    pub stale_after_secs: Option<u64>,
}

/// Configuration merger
/// Priority order: CLI -> File -> Defaults
pub struct ConfigMerger {
    defaults: StoreConfig,
    file: Option<StoreConfig>,
    cli: Option<PartialConfig>,
}

impl ConfigMerger {
    /// Create a new config merger with defaults
    pub fn new() -> Self {
        Self {
            defaults: StoreConfig::default(),
            file: None,
            cli: None,
        }
    }

    /// Set the config loaded from file
    pub fn with_file(mut self, config: Option<StoreConfig>) -> Self {
        self.file = config;
        self
    }

    /// Set CLI overrides
    pub fn with_cli(mut self, config: Option<PartialConfig>) -> Self {
        self.cli = config;
        self
    }

    /// Merge all configs with priority
    pub fn merge(&self) -> StoreConfig {
        let base = self.file.clone().unwrap_or_else(|| self.defaults.clone());

        match self.cli {
            Some(ref cli) => self.merge_partial(&base, cli),
            None => base,
        }
    }

    /// Merge partial config into full config
    fn merge_partial(&self, base: &StoreConfig, partial: &PartialConfig) -> StoreConfig {
        StoreConfig {
            servers: partial.servers.clone().unwrap_or_else(|| base.servers.clone()),
            connect_timeout_ms: partial.connect_timeout_ms.unwrap_or(base.connect_timeout_ms),
            namespace: partial
                .namespace
                .clone()
                .unwrap_or_else(|| base.namespace.clone()),
            max_lifetime_secs: partial.max_lifetime_secs.unwrap_or(base.max_lifetime_secs),
            gc_interval_secs: partial.gc_interval_secs.unwrap_or(base.gc_interval_secs),
            lock: partial
                .lock
                .as_ref()
                .map(|p| self.merge_partial_lock(&base.lock, p))
                .unwrap_or_else(|| base.lock.clone()),
        }
    }

    fn merge_partial_lock(&self, base: &LockConfig, partial: &PartialLockConfig) -> LockConfig {
        LockConfig {
            initial_backoff_ms: partial.initial_backoff_ms.unwrap_or(base.initial_backoff_ms),
            max_backoff_ms: partial.max_backoff_ms.unwrap_or(base.max_backoff_ms),
            total_timeout_ms: partial.total_timeout_ms.unwrap_or(base.total_timeout_ms),
            stale_after_secs: partial.stale_after_secs.unwrap_or(base.stale_after_secs),
        }
    }
}

impl Default for ConfigMerger {
    fn default() -> Self {
        Self::new()
    }
}
