//! Defines the unified error surface for the host process.

use std::process::ExitCode;
use std::sync::Arc;

use gpulse_client::{ClientError, ServerFailure};
use ortho_config::OrthoError;
use thiserror::Error;

use crate::shutdown::ShutdownError;
use crate::telemetry::TelemetryError;

/// Errors surfaced while running the host.
#[derive(Debug, Error)]
pub enum HostError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The language client could not be activated.
    #[error("failed to start the language client: {source}")]
    Activation {
        /// Underlying client error.
        #[source]
        source: ClientError,
    },
    /// Waiting for a termination signal failed.
    #[error("failed to await shutdown signal: {source}")]
    Shutdown {
        /// Underlying signal error.
        #[source]
        source: ShutdownError,
    },
    /// The language server stopped while the host was running.
    #[error("language server stopped unexpectedly: {failure}")]
    ServerFailed {
        /// What the client observed.
        failure: ServerFailure,
    },
}

impl HostError {
    /// Process exit code reported for this error.
    ///
    /// | error | code |
    /// |---|---|
    /// | configuration or telemetry | 2 |
    /// | server executable not found | 3 |
    /// | other activation failure | 4 |
    /// | server failure at runtime | 5 |
    /// | signal handling | 1 |
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        let code = match self {
            Self::Configuration { .. } | Self::Telemetry { .. } => 2,
            Self::Activation { source } if source.is_server_not_found() => 3,
            Self::Activation { .. } => 4,
            Self::ServerFailed { .. } => 5,
            Self::Shutdown { .. } => 1,
        };
        ExitCode::from(code)
    }

    /// Whether the user should be told directly, not only through logs.
    #[must_use]
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::Telemetry { .. })
            || matches!(self, Self::Activation { source } if source.is_server_not_found())
    }
}

impl From<ClientError> for HostError {
    fn from(source: ClientError) -> Self {
        Self::Activation { source }
    }
}

impl From<ShutdownError> for HostError {
    fn from(source: ShutdownError) -> Self {
        Self::Shutdown { source }
    }
}
