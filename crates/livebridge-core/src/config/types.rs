//! Settings types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete daemon settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Default interval between polls of a polling source
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Maximum time to wait for running bridges to drain on shutdown
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub control: ControlSettings,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            storage: StorageSettings::default(),
            control: ControlSettings::default(),
            retry: RetrySettings::default(),
        }
    }
}

impl Settings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn default_poll_interval() -> u64 {
    60
}

fn default_shutdown_timeout() -> u64 {
    30
}

/// Storage backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Backend selector: `memory://`, `dummy://` or `file://<path>`
    #[serde(default = "default_dsn")]
    pub dsn: String,
    /// Name of the sync record collection
    #[serde(default = "default_table_name")]
    pub table_name: String,
    /// Name of the control data collection
    #[serde(default = "default_control_table_name")]
    pub control_table_name: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            dsn: default_dsn(),
            table_name: default_table_name(),
            control_table_name: default_control_table_name(),
        }
    }
}

fn default_dsn() -> String {
    "memory://".to_string()
}

fn default_table_name() -> String {
    "livebridge_dev".to_string()
}

fn default_control_table_name() -> String {
    "livebridge_control".to_string()
}

/// Control document settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlSettings {
    /// Control document location: a file path, `storage` or `checksum`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Interval between change checks
    #[serde(default = "default_watch_interval")]
    pub watch_interval_secs: u64,
    /// Reload automatically when the control document changes
    #[serde(default = "default_true")]
    pub auto_update: bool,
    /// Delay before retrying when no control document could be loaded
    #[serde(default = "default_retry_run_interval")]
    pub retry_run_interval_secs: u64,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            path: None,
            watch_interval_secs: default_watch_interval(),
            auto_update: true,
            retry_run_interval_secs: default_retry_run_interval(),
        }
    }
}

impl ControlSettings {
    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch_interval_secs)
    }

    pub fn retry_run_interval(&self) -> Duration {
        Duration::from_secs(self.retry_run_interval_secs)
    }
}

fn default_watch_interval() -> u64 {
    60
}

fn default_retry_run_interval() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

/// Delivery retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Backoff unit: the n-th retry waits `multiplier_ms * n`
    #[serde(default = "default_multiplier_ms")]
    pub multiplier_ms: u64,
    /// Attempts after which a failing item is dropped
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            multiplier_ms: default_multiplier_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl RetrySettings {
    pub fn multiplier(&self) -> Duration {
        Duration::from_millis(self.multiplier_ms)
    }
}

fn default_multiplier_ms() -> u64 {
    5_000
}

fn default_max_retries() -> u32 {
    10
}
