use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sleep for `duration` unless `cancel` fires first.
///
/// Returns true when the full duration elapsed, false when cancelled.
/// Cancellation is a normal return, not an error.
pub async fn cancellable_sleep(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
