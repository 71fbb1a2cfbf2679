//! Configuration file management.

use std::path::PathBuf;
use std::time::Duration;

use capsule_sched::SchedulerConfig;
use capsule_types::{DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_CONCURRENT};
use serde::{Deserialize, Serialize};

use crate::policy::NetworkPolicy;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "CAPSULE_DATA_DIR";

const MB: u64 = 1024 * 1024;

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub downloads: DownloadConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
    /// Eviction cap for downloaded content. 0 = no quota sweep.
    #[serde(default = "default_quota_mb")]
    pub quota_mb: u64,
    /// Writes beyond this fail with a quota error. 0 = disk-limited only.
    #[serde(default)]
    pub hard_limit_mb: u64,
    /// Seconds between expiry sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Initial value of the "auto-delete cached resources" setting.
    #[serde(default)]
    pub auto_delete_resources: bool,
}

/// Download scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff")]
    pub base_backoff_secs: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout_secs: u64,
    /// Seconds between scheduler ticks.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Units without a `source_url` are fetched from `<base>/<id>`.
    #[serde(default = "default_content_base_url")]
    pub content_base_url: String,
}

/// When downloads may use the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Never download over metered links.
    #[serde(default = "default_true")]
    pub wifi_only: bool,
    /// Download only inside the night window.
    #[serde(default)]
    pub night_only: bool,
    /// Local hour the night window opens (inclusive).
    #[serde(default = "default_night_start")]
    pub night_start_hour: u32,
    /// Local hour the night window closes (exclusive).
    #[serde(default = "default_night_end")]
    pub night_end_hour: u32,
}

/// Advanced configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Log level: "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log file path. Empty = stderr.
    #[serde(default)]
    pub log_file: String,
}

// Default value functions

fn default_quota_mb() -> u64 {
    2048
}

fn default_sweep_interval() -> u64 {
    15 * 60
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_base_backoff() -> u64 {
    30
}

fn default_max_backoff() -> u64 {
    3600
}

fn default_transfer_timeout() -> u64 {
    120
}

fn default_tick_interval() -> u64 {
    5
}

fn default_content_base_url() -> String {
    "https://content.capsule-edu.org/units".to_string()
}

fn default_true() -> bool {
    true
}

fn default_night_start() -> u32 {
    2
}

fn default_night_end() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
            quota_mb: default_quota_mb(),
            hard_limit_mb: 0,
            sweep_interval_secs: default_sweep_interval(),
            auto_delete_resources: false,
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_attempts: default_max_attempts(),
            base_backoff_secs: default_base_backoff(),
            max_backoff_secs: default_max_backoff(),
            transfer_timeout_secs: default_transfer_timeout(),
            tick_interval_secs: default_tick_interval(),
            content_base_url: default_content_base_url(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_only: true,
            night_only: false,
            night_start_hour: default_night_start(),
            night_end_hour: default_night_end(),
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: String::new(),
        }
    }
}

impl StorageConfig {
    pub fn quota_bytes(&self) -> Option<u64> {
        (self.quota_mb > 0).then(|| self.quota_mb.saturating_mul(MB))
    }

    pub fn hard_limit_bytes(&self) -> Option<u64> {
        (self.hard_limit_mb > 0).then(|| self.hard_limit_mb.saturating_mul(MB))
    }
}

impl DownloadConfig {
    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent: self.max_concurrent.max(1),
            max_attempts: self.max_attempts.max(1),
            base_backoff_secs: self.base_backoff_secs,
            max_backoff_secs: self.max_backoff_secs,
            transfer_timeout: Duration::from_secs(self.transfer_timeout_secs),
        }
    }
}

impl NetworkConfig {
    pub fn policy(&self) -> NetworkPolicy {
        NetworkPolicy {
            wifi_only: self.wifi_only,
            night_only: self.night_only,
            night_start_hour: self.night_start_hour,
            night_end_hour: self.night_end_hour,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: DaemonConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join("capsule.db")
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir().join("blobs")
    }

    pub fn socket_path(&self) -> PathBuf {
        self.data_dir().join("daemon.sock")
    }

    fn config_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }

    /// Platform-specific default data directory.
    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            return PathBuf::from(dir);
        }
        #[cfg(target_os = "macos")]
        {
            dirs_fallback("Library/Application Support/Capsule")
        }
        #[cfg(target_os = "windows")]
        {
            dirs_fallback("Capsule")
        }
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            dirs_fallback(".capsule")
        }
    }
}

/// Fallback home directory resolution.
fn dirs_fallback(subpath: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(subpath))
        .unwrap_or_else(|_| PathBuf::from("/tmp/capsule"))
}
