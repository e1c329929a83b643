//! Logging infrastructure for seedgate.
//!
//! Structured console logging via `tracing`, configurable with the
//! `RUST_LOG` environment variable (defaults to `info`).

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Initialize the logging system.
///
/// Installs a global subscriber writing to stdout. Returns an error if a
/// subscriber was already installed.
pub fn init_logging() -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .try_init()
        .map_err(|e| e.to_string())
}
