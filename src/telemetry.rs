//! Structured logging initialisation.

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Errors raised while installing the tracing subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Raised when a global subscriber is already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Init(String),
}

/// Installs a formatting tracing subscriber filtered by `RUST_LOG`,
/// defaulting to `info` when the variable is unset.
///
/// Call once at process start; library code only emits events.
///
/// # Errors
///
/// Returns [`TelemetryError::Init`] when a global subscriber was already
/// installed.
pub fn init() -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| TelemetryError::Init(err.to_string()))
}
