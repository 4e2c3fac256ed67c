//! Runs the language client for the lifetime of the host process.

use gpulse_client::{
    ClientManager, ClientStatus, Extension, ExtensionContext, LaunchMode, ProcessSpawner,
    ServerFailure, ServerSpawner, StatusSnapshot,
};
use tokio::sync::watch;
use tracing::{error, info};

use crate::HOST_TARGET;
use crate::bootstrap::{self, ConfigLoader, SystemConfigLoader};
use crate::errors::HostError;
use crate::shutdown::{ShutdownSignal, SystemShutdownSignal};
use crate::telemetry;

/// Runs the host using the production collaborators.
///
/// # Errors
///
/// See [`run_host_with`].
pub async fn run_host() -> Result<(), HostError> {
    run_host_with(&SystemConfigLoader, &SystemShutdownSignal, ProcessSpawner).await
}

/// Runs the host with injected collaborators.
///
/// Activates the client, waits for `shutdown` or for the server to fail, and
/// then disposes the extension context, which deactivates the client.
///
/// # Errors
///
/// Returns `HostError::Configuration` or `HostError::Telemetry` before
/// anything is launched, `HostError::Activation` when the client cannot
/// start, `HostError::ServerFailed` when the server stops on its own, and
/// `HostError::Shutdown` when signal handlers cannot be installed.
pub async fn run_host_with<L, H, S>(loader: &L, shutdown: &H, spawner: S) -> Result<(), HostError>
where
    L: ConfigLoader,
    H: ShutdownSignal,
    S: ServerSpawner,
{
    let config = loader
        .load()
        .map_err(|source| HostError::Configuration { source })?;
    telemetry::initialise(&config).map_err(|source| HostError::Telemetry { source })?;

    let mode = LaunchMode::from(config.debug);
    info!(
        target: HOST_TARGET,
        ?mode,
        transport = %config.transport(),
        language = %config.language_id,
        "starting gpulse host"
    );

    let manager = ClientManager::new(spawner, bootstrap::client_timeouts(&config));
    let extension = Extension::new(bootstrap::launcher(&config), manager);
    let mut context = ExtensionContext::new(mode);

    if let Err(source) = extension.activate(&mut context).await {
        error!(target: HOST_TARGET, error = %source, "language client did not start");
        return Err(HostError::Activation { source });
    }

    let status = extension.manager().subscribe();
    let outcome = tokio::select! {
        result = shutdown.wait() => result.map_err(HostError::from),
        failure = wait_for_failure(status) => Err(HostError::ServerFailed { failure }),
    };

    context.dispose().await;
    match &outcome {
        Ok(()) => info!(target: HOST_TARGET, "shutdown sequence completed"),
        Err(error) => error!(target: HOST_TARGET, error = %error, "host stopping after failure"),
    }
    outcome
}

async fn wait_for_failure(mut status: watch::Receiver<StatusSnapshot>) -> ServerFailure {
    let failure = match status
        .wait_for(|snapshot| matches!(snapshot.status, ClientStatus::Failed(_)))
        .await
    {
        Ok(snapshot) => match &snapshot.status {
            ClientStatus::Failed(failure) => Some(failure.clone()),
            _ => None,
        },
        Err(_) => None,
    };
    match failure {
        Some(failure) => failure,
        None => std::future::pending().await,
    }
}
