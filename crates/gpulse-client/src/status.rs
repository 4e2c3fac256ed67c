//! Observable lifecycle status of a managed client.

use std::fmt;

use crate::process::ExitOutcome;

/// Lifecycle status published by [`crate::ClientManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientStatus {
    /// No client exists.
    Absent,
    /// A server is being spawned, connected and initialised.
    Starting,
    /// The handshake completed and document events are forwarded.
    Running,
    /// The server is being shut down.
    Stopping,
    /// The server stopped without being asked to.
    Failed(ServerFailure),
}

impl ClientStatus {
    /// Whether the status accepts a new activation.
    #[must_use]
    pub fn accepts_activation(&self) -> bool {
        matches!(self, Self::Absent | Self::Failed(_))
    }
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => formatter.write_str("absent"),
            Self::Starting => formatter.write_str("starting"),
            Self::Running => formatter.write_str("running"),
            Self::Stopping => formatter.write_str("stopping"),
            Self::Failed(failure) => write!(formatter, "failed ({failure})"),
        }
    }
}

/// What was observed when a running server went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerFailure {
    /// The first signal the monitor saw.
    pub cause: FailureCause,
    /// How the process ended once reaped.
    pub outcome: ExitOutcome,
}

impl fmt::Display for ServerFailure {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}, {}", self.cause, self.outcome)
    }
}

/// Which side of the connection noticed the failure first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// The server process exited.
    ProcessExited,
    /// The message stream closed or broke.
    TransportClosed(String),
}

impl fmt::Display for FailureCause {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProcessExited => formatter.write_str("process exited"),
            Self::TransportClosed(reason) => write!(formatter, "transport closed: {reason}"),
        }
    }
}

/// A status change together with the activation it belongs to.
///
/// `epoch` increases with every accepted activation, so subscribers can tell
/// a fresh `Starting` from a stale one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Activation counter.
    pub epoch: u64,
    /// Status at the time of publication.
    pub status: ClientStatus,
}
