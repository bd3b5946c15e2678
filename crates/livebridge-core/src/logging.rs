//! Shared logging initialization for livebridge binaries.

use std::sync::OnceLock;

static INIT: OnceLock<()> = OnceLock::new();

fn parse_level(value: &str) -> tracing::Level {
    match value.to_ascii_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

/// Resolve the log level: `verbose` forces DEBUG, otherwise `LB_LOGLEVEL`
/// decides (default INFO).
pub fn resolve_level(verbose: bool) -> tracing::Level {
    if verbose {
        return tracing::Level::DEBUG;
    }
    std::env::var("LB_LOGLEVEL")
        .map(|v| parse_level(&v))
        .unwrap_or(tracing::Level::INFO)
}

/// Initialize process-level tracing output.
///
/// Safe to call multiple times; only the first call installs the subscriber.
/// Best-effort, never returns an error.
pub fn init(verbose: bool) {
    if INIT.get().is_some() {
        return;
    }
    let level = resolve_level(verbose);
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
    let _ = INIT.set(());
}
