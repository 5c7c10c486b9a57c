//! Structured telemetry initialisation for embedding hosts.
//!
//! Hosts that already install their own `tracing` subscriber can ignore this
//! module entirely; console events flow to whatever subscriber is active.
//! Hosts without one call [`initialise`] once, typically right before
//! starting a server.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

/// Environment variable consulted for the log filter expression.
pub const LOG_FILTER_ENV: &str = "OPCON_LOG";

const DEFAULT_FILTER: &str = "info";

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Configures the global tracing subscriber when invoked for the first time.
///
/// The filter expression comes from [`LOG_FILTER_ENV`] and falls back to
/// `info`. Repeated calls are idempotent: the first invocation installs the
/// global subscriber and later ones return a fresh [`TelemetryHandle`]
/// without touching the global state again.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the filter expression fails to parse or a
/// conflicting global subscriber was installed concurrently.
pub fn initialise() -> Result<TelemetryHandle, TelemetryError> {
    let expression =
        std::env::var(LOG_FILTER_ENV).unwrap_or_else(|_| DEFAULT_FILTER.to_owned());
    initialise_with(&expression)
}

/// As [`initialise`], with an explicit filter expression instead of the
/// environment lookup.
///
/// # Errors
///
/// As [`initialise`].
pub fn initialise_with(filter: &str) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(filter))
        .map(|_| TelemetryHandle)
}

fn install_subscriber(expression: &str) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(expression)
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(io::stderr)
        // Avoid stray colour codes in non-TTY sinks while keeping colour on
        // interactive terminals.
        .with_ansi(io::stderr().is_terminal())
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialisation_is_idempotent() {
        let first = initialise();
        let second = initialise();
        // Another test may have installed a subscriber first; both calls must
        // agree either way.
        assert_eq!(first.is_ok(), second.is_ok());
    }
}
