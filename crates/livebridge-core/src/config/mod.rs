//! Settings resolution
//!
//! Resolves daemon settings from multiple sources with priority:
//! 1. Command-line flags (passed as parameters)
//! 2. Environment variables (`LB_*`)
//! 3. Settings file (TOML)
//! 4. Defaults

mod discovery;
mod types;

pub use discovery::{SettingsError, SettingsOverrides, load_settings_file, resolve_settings};
pub use types::{ControlSettings, RetrySettings, Settings, StorageSettings};
