//! Internal lifecycle state of a [`super::ClientManager`].

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::connection::LanguageClient;
use crate::status::{ClientStatus, ServerFailure};

/// Lifecycle state. Each non-idle variant carries the epoch of the
/// activation it belongs to so late completions cannot clobber a newer
/// activation.
pub(crate) enum ClientState {
    Absent,
    Starting {
        epoch: u64,
        cancel: CancellationToken,
    },
    Running {
        epoch: u64,
        client: Arc<LanguageClient>,
    },
    Stopping {
        epoch: u64,
    },
    Failed {
        failure: ServerFailure,
    },
}

impl ClientState {
    pub(crate) fn status(&self) -> ClientStatus {
        match self {
            Self::Absent => ClientStatus::Absent,
            Self::Starting { .. } => ClientStatus::Starting,
            Self::Running { .. } => ClientStatus::Running,
            Self::Stopping { .. } => ClientStatus::Stopping,
            Self::Failed { failure } => ClientStatus::Failed(failure.clone()),
        }
    }

    pub(crate) fn epoch(&self) -> Option<u64> {
        match self {
            Self::Starting { epoch, .. } | Self::Running { epoch, .. } | Self::Stopping { epoch } => {
                Some(*epoch)
            }
            Self::Absent | Self::Failed { .. } => None,
        }
    }

    /// Whether the state is `Starting` or `Stopping` for `epoch`.
    pub(crate) fn is_transient_for(&self, epoch: u64) -> bool {
        matches!(
            self,
            Self::Starting { epoch: current, .. } | Self::Stopping { epoch: current }
                if *current == epoch
        )
    }
}
