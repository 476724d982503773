// Configuration file loading

use crate::session::{BackoffPolicy, SessionConfig};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const FILE_SCHEME: &str = "file://";

/// Session store configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store endpoints. The file backend uses the first `file://` entry.
    #[serde(default = "default_servers")]
    pub servers: Vec<String>,
    /// Timeout for bootstrapping the store connection
    #[serde(rename = "connectTimeoutMs", alias = "connect_timeout_ms", default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Prefix for session ids; empty for none
    #[serde(default)]
    pub namespace: String,
    /// Idle lifetime stamped on every write
    #[serde(rename = "maxLifetimeSecs", alias = "max_lifetime_secs", default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,
    /// Interval between background gc sweeps
    #[serde(rename = "gcIntervalSecs", alias = "gc_interval_secs", default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,
    /// Lock acquisition settings
    #[serde(default)]
    pub lock: LockConfig,
}

fn default_servers() -> Vec<String> { vec!["localhost:27017".to_string()] }
fn default_connect_timeout_ms() -> u64 { 1000 }
fn default_max_lifetime_secs() -> u64 { 1440 }
fn default_gc_interval_secs() -> u64 { 300 }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            connect_timeout_ms: default_connect_timeout_ms(),
            namespace: String::new(),
            max_lifetime_secs: default_max_lifetime_secs(),
            gc_interval_secs: default_gc_interval_secs(),
            lock: LockConfig::default(),
        }
    }
}

/// Lock acquisition configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// Delay before the first retry
    #[serde(rename = "initialBackoffMs", alias = "initial_backoff_ms", default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Cap for a single retry delay
    #[serde(rename = "maxBackoffMs", alias = "max_backoff_ms", default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Total wait before reporting the session unavailable
    #[serde(rename = "totalTimeoutMs", alias = "total_timeout_ms", default = "default_total_timeout_ms")]
    pub total_timeout_ms: u64,
    /// Take over locks older than this; 0 disables takeover
    #[serde(rename = "staleAfterSecs", alias = "stale_after_secs", default)]
    pub stale_after_secs: u64,
}

fn default_initial_backoff_ms() -> u64 { 5 }
fn default_max_backoff_ms() -> u64 { 1000 }
fn default_total_timeout_ms() -> u64 { 30_000 }

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            total_timeout_ms: default_total_timeout_ms(),
            stale_after_secs: 0,
        }
    }
}

impl LockConfig {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: Duration::from_millis(self.initial_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
            total_timeout: Duration::from_millis(self.total_timeout_ms),
        }
    }

    pub fn stale_after(&self) -> Option<Duration> {
        (self.stale_after_secs > 0).then(|| Duration::from_secs(self.stale_after_secs))
    }
}

impl StoreConfig {
    /// Runtime settings for a `SessionStore`
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            namespace: self.namespace.clone(),
            max_lifetime: self.max_lifetime(),
            backoff: self.lock.backoff_policy(),
            stale_lock_after: self.lock.stale_after(),
        }
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Directory of the first `file://` endpoint, if any
    pub fn file_endpoint(&self) -> Option<PathBuf> {
        self.servers
            .iter()
            .find_map(|s| s.strip_prefix(FILE_SCHEME))
            .map(PathBuf::from)
    }

    /// Validate config values
    pub fn validate(&self) -> Result<()> {
        if self.max_lifetime_secs == 0 {
            return Err(anyhow!("maxLifetimeSecs must be greater than 0"));
        }
        if self.gc_interval_secs == 0 {
            return Err(anyhow!("gcIntervalSecs must be greater than 0"));
        }
        if self.lock.initial_backoff_ms == 0 {
            return Err(anyhow!("lock.initialBackoffMs must be greater than 0"));
        }
        if self.lock.initial_backoff_ms > self.lock.max_backoff_ms {
            return Err(anyhow!(
                "lock.initialBackoffMs ({}) cannot exceed lock.maxBackoffMs ({})",
                self.lock.initial_backoff_ms,
                self.lock.max_backoff_ms
            ));
        }
        if self.servers.is_empty() {
            return Err(anyhow!("servers must list at least one endpoint"));
        }
        Ok(())
    }
}

/// Load config from a path, falling back to defaults when the file is missing
pub fn load_config(path: &Path) -> Result<StoreConfig> {
    if !path.exists() {
        log::debug!("No config at {}, using defaults", path.display());
        return Ok(StoreConfig::default());
    }

    let contents = fs::read_to_string(path)
        .map_err(|e| anyhow!("Failed to read config file '{}': {}", path.display(), e))?;

    let config: StoreConfig = toml::from_str(&contents)
        .map_err(|e| anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;

    config.validate()?;
    Ok(config)
}

/// Save config to a path
pub fn save_config(path: &Path, config: &StoreConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                anyhow!("Failed to create config directory '{}': {}", parent.display(), e)
            })?;
        }
    }

    config.validate()?;

    let contents = toml::to_string_pretty(config)
        .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;
    fs::write(path, contents)
        .map_err(|e| anyhow!("Failed to write config file '{}': {}", path.display(), e))?;

    log::info!("Saved config to: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_dir() -> TempDir {
        TempDir::new().unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.servers, vec!["localhost:27017"]);
        assert_eq!(config.max_lifetime_secs, 1440);
        assert_eq!(config.lock.backoff_policy(), BackoffPolicy::default());
        assert!(config.lock.stale_after().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = create_test_dir();
        let config = load_config(&temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn test_load_camel_case_and_aliases() {
        let temp_dir = create_test_dir();
        let path = temp_dir.path().join("session.toml");
        fs::write(
            &path,
            r#"
servers = ["file:///var/lib/sessions", "db2:27017"]
namespace = "shop"
maxLifetimeSecs = 600
gc_interval_secs = 30

[lock]
initialBackoffMs = 10
max_backoff_ms = 500
totalTimeoutMs = 5000
staleAfterSecs = 120
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.namespace, "shop");
        assert_eq!(config.file_endpoint(), Some(PathBuf::from("/var/lib/sessions")));
        assert_eq!(config.gc_interval(), Duration::from_secs(30));
        assert_eq!(config.connect_timeout_ms, 1000);

        let session = config.session_config();
        assert_eq!(session.max_lifetime, Duration::from_secs(600));
        assert_eq!(session.backoff.initial_delay, Duration::from_millis(10));
        assert_eq!(session.backoff.max_delay, Duration::from_millis(500));
        assert_eq!(session.backoff.total_timeout, Duration::from_secs(5));
        assert_eq!(session.stale_lock_after, Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_invalid_backoff_rejected() {
        let temp_dir = create_test_dir();
        let path = temp_dir.path().join("session.toml");
        fs::write(&path, "[lock]\ninitialBackoffMs = 2000\nmaxBackoffMs = 1000\n").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("initialBackoffMs"));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let temp_dir = create_test_dir();
        let path = temp_dir.path().join("session.toml");
        fs::write(&path, "servers = [").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_no_file_endpoint() {
        assert!(StoreConfig::default().file_endpoint().is_none());
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = create_test_dir();
        let path = temp_dir.path().join("nested").join("session.toml");
        let config = StoreConfig {
            namespace: "api".to_string(),
            ..Default::default()
        };

        save_config(&path, &config).unwrap();
        assert_eq!(load_config(&path).unwrap(), config);
    }
}
