//! Error types surfaced by the language client.

use std::error::Error;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::jsonrpc::JsonRpcError;
use crate::status::{ClientStatus, ServerFailure};
use crate::transport::TransportError;

/// Why a resolved executable path cannot be launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingExecutable {
    /// Nothing exists at the path.
    Absent,
    /// The path exists but is a directory or another non-file entry.
    NotAFile,
    /// The file lacks execute permission.
    NotExecutable,
    /// No directory on `PATH` contains the executable.
    NotOnPath,
}

impl fmt::Display for MissingExecutable {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Absent => "no such file",
            Self::NotAFile => "not a regular file",
            Self::NotExecutable => "not executable",
            Self::NotOnPath => "not found on PATH",
        };
        formatter.write_str(label)
    }
}

/// Errors returned by the launcher and the client lifecycle manager.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server executable could not be resolved. The client cannot work
    /// without it, so hosts should report this to the user.
    #[error("language server executable '{}' is unusable: {reason}", path.display())]
    ServerNotFound {
        /// Path that was checked (or the bare name for `PATH` searches).
        path: PathBuf,
        /// What was wrong with it.
        reason: MissingExecutable,
    },

    /// Spawning, connecting or initialising the server failed. The client is
    /// left absent and activation may be retried.
    #[error("failed to start language server transport: {message}")]
    TransportStartFailure {
        /// Description of the failing step.
        message: String,
        /// Underlying error, when one exists.
        #[source]
        source: Option<Box<dyn Error + Send + Sync>>,
    },

    /// The server stopped while the client was running.
    #[error("language server stopped unexpectedly: {failure}")]
    UnexpectedServerExit {
        /// What was observed.
        failure: ServerFailure,
    },

    /// `activate` was called while a client is starting, running or stopping.
    #[error("cannot activate while the client is {status}")]
    ActivationRejected {
        /// State at the time of the call.
        status: ClientStatus,
    },

    /// `deactivate` cancelled the start before the client became ready.
    #[error("client start was cancelled by deactivation")]
    StartCancelled,

    /// A document event arrived while no client is running.
    #[error("no language client is running")]
    NotRunning,

    /// The connection to the server closed.
    #[error("connection to the language server is closed")]
    ConnectionClosed,

    /// Transport-level I/O error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// JSON serialisation or deserialisation error.
    #[error("JSON codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The server returned an error response.
    #[error("server returned error: {message} (code: {code})")]
    ServerError {
        /// The JSON-RPC error code.
        code: i64,
        /// The error message from the server.
        message: String,
    },

    /// No response arrived in time.
    #[error("{method} request timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// Method of the request.
        method: String,
        /// Budget that elapsed.
        timeout_ms: u128,
    },
}

impl ClientError {
    /// Creates a server error from a JSON-RPC error.
    #[must_use]
    pub fn from_jsonrpc(error: JsonRpcError) -> Self {
        Self::ServerError {
            code: error.code,
            message: error.message,
        }
    }

    /// Builds a `TransportStartFailure` without an underlying source.
    #[must_use]
    pub fn start_failure(message: impl Into<String>) -> Self {
        Self::TransportStartFailure {
            message: message.into(),
            source: None,
        }
    }

    /// Builds a `TransportStartFailure` wrapping an underlying error.
    #[must_use]
    pub fn start_failure_with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn Error + Send + Sync>>,
    ) -> Self {
        Self::TransportStartFailure {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Reclassifies a failure observed during startup so hosts see either
    /// `ServerNotFound` or `TransportStartFailure`.
    pub(crate) fn into_start_failure(self) -> Self {
        match self {
            Self::ServerNotFound { .. } | Self::TransportStartFailure { .. } => self,
            other => Self::start_failure_with_source("initialisation handshake failed", other),
        }
    }

    /// Whether the error is the fatal missing-executable case.
    #[must_use]
    pub fn is_server_not_found(&self) -> bool {
        matches!(self, Self::ServerNotFound { .. })
    }
}

impl From<ServerFailure> for ClientError {
    fn from(failure: ServerFailure) -> Self {
        Self::UnexpectedServerExit { failure }
    }
}
