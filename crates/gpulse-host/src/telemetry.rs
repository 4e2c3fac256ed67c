//! Structured telemetry initialisation for the host.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt;

use gpulse_client::SERVER_LOG_TARGET;
use gpulse_config::{Config, LogFormat};

/// Level for server output when the filter does not mention the server
/// target. Server output is what an editor's output channel shows, so a
/// quiet global filter must not hide it.
const SERVER_OUTPUT_LEVEL: &str = "info";

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

/// Installs the global subscriber on first use; later calls only return a
/// handle.
///
/// Logs go to stderr so a server speaking over the host's stdio never sees
/// them. `RUST_LOG` is not consulted; `log_filter` is the single source,
/// widened so server output is kept at `info` unless it names the server
/// target itself.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(config))
        .map(|()| TelemetryHandle)
}

fn build_filter(expression: &str) -> Result<EnvFilter, TelemetryError> {
    let filter =
        EnvFilter::try_new(expression).map_err(|error| TelemetryError::Filter(error.to_string()))?;
    if expression.contains(SERVER_LOG_TARGET) {
        return Ok(filter);
    }
    let directive: Directive = format!("{SERVER_LOG_TARGET}={SERVER_OUTPUT_LEVEL}")
        .parse()
        .map_err(|error: tracing_subscriber::filter::ParseError| {
            TelemetryError::Filter(error.to_string())
        })?;
    Ok(filter.add_directive(directive))
}

fn install_subscriber(config: &Config) -> Result<(), TelemetryError> {
    let filter = build_filter(config.log_filter())?;

    let builder = |filter: EnvFilter| {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_writer(io::stderr)
            .with_ansi(io::stderr().is_terminal())
            .with_timer(fmt::time::UtcTime::rfc_3339())
    };

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format() {
        LogFormat::Json => Box::new(builder(filter).json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder(filter).compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}
