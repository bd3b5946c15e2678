//! Composition root of the daemon

use crate::component::ComponentRegistry;
use crate::control::{ControlData, client_for};
use crate::controller::{Controller, ShutdownReport};
use crate::storage;
use anyhow::{Context, Result};
use livebridge_core::config::Settings;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Run the daemon until `cancel` fires.
///
/// This function:
/// 1. Connects the storage backend named by the settings
/// 2. Runs storage setup (a failure aborts startup)
/// 3. Opens the control location
/// 4. Runs the controller until cancelled, then shuts it down
///
/// # Errors
///
/// Returns an error when no control location is configured, the storage
/// backend cannot be created or its setup fails.
pub async fn run(
    settings: &Settings,
    registry: ComponentRegistry,
    cancel: CancellationToken,
) -> Result<ShutdownReport> {
    let control_path = settings
        .control
        .path
        .clone()
        .context("No control location configured (use --control or LB_CONTROL)")?;

    let storage = storage::connect(&settings.storage).context("Failed to create storage client")?;
    let created = storage
        .setup()
        .await
        .with_context(|| format!("Failed to set up {} storage", storage.name()))?;
    if created {
        info!("Storage {} set up", storage.name());
    }

    info!(
        "Registered {} source type(s), {} target type(s)",
        registry.list_sources().len(),
        registry.list_targets().len()
    );

    let client = client_for(&control_path, Arc::clone(&storage));
    let control = ControlData::new(client, control_path, settings.control.auto_update);
    let mut controller = Controller::new(control, Arc::new(registry), storage, settings, cancel);

    info!("Daemon running. Waiting for cancellation signal...");
    let report = controller.run().await;
    if report.timed_out > 0 {
        warn!("{} bridge(s) did not stop in time", report.timed_out);
    }

    info!("Daemon shutdown complete");
    Ok(report)
}
