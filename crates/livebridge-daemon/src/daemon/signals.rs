//! Process signals to cancellation

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cancel `cancel` on SIGINT (Ctrl+C) or, on unix, SIGTERM
pub fn spawn_signal_handler(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
                        _ = sigterm.recv() => info!("Received SIGTERM"),
                        _ = cancel.cancelled() => return,
                    }
                }
                Err(e) => {
                    error!("Failed to create SIGTERM handler: {}", e);
                    tokio::select! {
                        result = ctrl_c => match result {
                            Ok(()) => info!("Received SIGINT (Ctrl+C)"),
                            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
                        },
                        _ = cancel.cancelled() => return,
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                result = ctrl_c => match result {
                    Ok(()) => info!("Received Ctrl+C"),
                    Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
                },
                _ = cancel.cancelled() => return,
            }
        }

        cancel.cancel();
    })
}
