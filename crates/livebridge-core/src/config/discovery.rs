//! Settings discovery and resolution

use super::types::Settings;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// Settings error
#[derive(Debug, Error)]
pub enum SettingsError {
    /// I/O error
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// TOML parsing error
    #[error("TOML parsing error in {path}: {source}")]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Command-line overrides for settings
#[derive(Debug, Default, Clone)]
pub struct SettingsOverrides {
    /// Path to a settings file
    pub settings_path: Option<PathBuf>,
    /// Control document location
    pub control_path: Option<String>,
    /// Override default poll interval
    pub poll_interval_secs: Option<u64>,
    /// Override storage backend
    pub dsn: Option<String>,
}

/// Resolve settings from all sources
///
/// Priority (highest to lowest):
/// 1. Command-line overrides
/// 2. Environment variables
/// 3. Settings file (`overrides.settings_path`)
/// 4. Defaults
///
/// # Errors
///
/// Returns an error only when an explicitly requested settings file cannot be
/// read or parsed. Malformed environment values are logged and ignored.
pub fn resolve_settings(overrides: &SettingsOverrides) -> Result<Settings, SettingsError> {
    // 4. Defaults, 3. settings file
    let mut settings = match &overrides.settings_path {
        Some(path) => load_settings_file(path)?,
        None => Settings::default(),
    };

    // 2. Environment
    apply_env_overrides(&mut settings);

    // 1. Command line
    apply_cli_overrides(&mut settings, overrides);

    Ok(settings)
}

/// Load settings from a TOML file
pub fn load_settings_file(path: &Path) -> Result<Settings, SettingsError> {
    let contents = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| SettingsError::TomlParse {
        path: path.to_path_buf(),
        source,
    })
}

fn env_parsed<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid value for {name}: {raw:?}");
            None
        }
    }
}

/// Apply environment variable overrides
fn apply_env_overrides(settings: &mut Settings) {
    if let Some(interval) = env_parsed::<u64>("LB_POLL_INTERVAL") {
        settings.poll_interval_secs = interval;
    }

    if let Ok(dsn) = std::env::var("LB_DB_DSN") {
        if !dsn.is_empty() {
            settings.storage.dsn = dsn;
        }
    }

    if let Ok(table) = std::env::var("LB_DB_TABLE") {
        settings.storage.table_name = table;
    }

    if let Ok(table) = std::env::var("LB_DB_CONTROL_TABLE") {
        settings.storage.control_table_name = table;
    }

    if let Ok(path) = std::env::var("LB_CONTROL") {
        settings.control.path = Some(path);
    }

    if let Some(interval) = env_parsed::<u64>("LB_CONTROL_WATCH_INTERVAL") {
        settings.control.watch_interval_secs = interval;
    }

    if let Some(auto_update) = env_parsed::<bool>("LB_CONTROL_AUTO_UPDATE") {
        settings.control.auto_update = auto_update;
    }
}

/// Apply command-line overrides
fn apply_cli_overrides(settings: &mut Settings, overrides: &SettingsOverrides) {
    if let Some(ref path) = overrides.control_path {
        settings.control.path = Some(path.clone());
    }

    if let Some(interval) = overrides.poll_interval_secs {
        settings.poll_interval_secs = interval;
    }

    if let Some(ref dsn) = overrides.dsn {
        settings.storage.dsn = dsn.clone();
    }
}
