//! livebridge - keeps content in sync from sources to targets

use anyhow::{Context, Result};
use clap::Parser;
use livebridge_core::config::{SettingsOverrides, resolve_settings};
use livebridge_daemon::component::ComponentRegistry;
use livebridge_daemon::daemon;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// livebridge - keeps content in sync from sources to targets
#[derive(Parser, Debug)]
#[command(name = "livebridge")]
#[command(about = "Keeps content in sync from sources to targets")]
#[command(version)]
struct Args {
    /// Control document: a file path, `storage` or `checksum`
    #[arg(long, value_name = "PATH")]
    control: Option<String>,

    /// Path to settings file (TOML)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the default poll interval in seconds
    #[arg(long, value_name = "SECS")]
    poll_interval: Option<u64>,

    /// Override the storage backend (`memory://`, `dummy://`, `file://<path>`)
    #[arg(long, value_name = "DSN")]
    dsn: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    livebridge_core::logging::init(args.verbose);

    info!("livebridge {} starting...", env!("CARGO_PKG_VERSION"));

    let overrides = SettingsOverrides {
        settings_path: args.config.clone(),
        control_path: args.control,
        poll_interval_secs: args.poll_interval,
        dsn: args.dsn,
    };
    let settings = resolve_settings(&overrides).context("Failed to resolve settings")?;

    if let Some(path) = args.config {
        info!("Loaded settings from: {}", path.display());
    }

    let registry = ComponentRegistry::with_builtins();

    let cancel = CancellationToken::new();
    let signals = daemon::spawn_signal_handler(cancel.clone());

    let result = daemon::run(&settings, registry, cancel.clone())
        .await
        .context("Daemon event loop failed");

    cancel.cancel();
    let _ = signals.await;

    result?;
    info!("livebridge shutdown complete");
    Ok(())
}
