//! Client lifecycle management.
//!
//! [`ClientManager`] owns at most one language client. It drives the
//! `absent → starting → running → stopping → absent` cycle, detects servers
//! that die underneath a running client, and forwards document events that
//! fall inside the client's selector.

mod configuration;
mod connection;
mod documents;
mod state;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lsp_types::{
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    DidSaveTextDocumentParams, InitializeResult, ServerCapabilities,
};
use tokio::sync::watch;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use configuration::{ClientConfiguration, SyncFeature, SynchronizationOptions};
pub use documents::Forwarding;

use self::connection::{CloseReason, Connection, LanguageClient};
use self::state::ClientState;
use crate::errors::ClientError;
use crate::launcher::ServerDescriptor;
use crate::process::{
    ExitOutcome, PendingConnection, ProcessSpawner, ServerSpawner, SpawnedServer,
};
use crate::status::{ClientStatus, FailureCause, ServerFailure, StatusSnapshot};

/// Log target for client lifecycle operations.
pub(crate) const CLIENT_TARGET: &str = "gpulse_client::client";

/// Time budgets for starting and stopping a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTimeouts {
    /// Spawn, connect and handshake.
    pub startup: Duration,
    /// Shutdown request, then the grace period before the process is killed.
    pub shutdown: Duration,
}

impl ClientTimeouts {
    /// Builds timeouts from the two budgets.
    #[must_use]
    pub const fn new(startup: Duration, shutdown: Duration) -> Self {
        Self { startup, shutdown }
    }
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(2))
    }
}

/// Result of [`ClientManager::deactivate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Deactivation {
    /// No client existed (or a failed one was cleared).
    NothingToDo,
    /// A start in progress was cancelled and its process terminated.
    Cancelled,
    /// The running client was stopped; the process ended with this outcome.
    Stopped(ExitOutcome),
}

struct Shared<S> {
    spawner: S,
    timeouts: ClientTimeouts,
    state: Mutex<ClientState>,
    status: watch::Sender<StatusSnapshot>,
    epochs: AtomicU64,
}

/// Owns the lifecycle of one language client.
///
/// Cloning yields another handle to the same client.
pub struct ClientManager<S = ProcessSpawner> {
    inner: Arc<Shared<S>>,
}

impl<S> Clone for ClientManager<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Default for ClientManager<ProcessSpawner> {
    fn default() -> Self {
        Self::new(ProcessSpawner, ClientTimeouts::default())
    }
}

impl<S> fmt::Debug for ClientManager<S> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClientManager")
            .field("status", &self.status())
            .field("timeouts", &self.inner.timeouts)
            .finish_non_exhaustive()
    }
}

/// Settles `epoch` back to `absent` when dropped while armed, so an
/// activation or stop abandoned mid-way cannot strand a transient state.
struct SettleOnDrop<S> {
    manager: ClientManager<S>,
    epoch: u64,
    armed: bool,
}

impl<S> SettleOnDrop<S> {
    fn new(manager: &ClientManager<S>, epoch: u64) -> Self {
        Self {
            manager: manager.clone(),
            epoch,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<S> Drop for SettleOnDrop<S> {
    fn drop(&mut self) {
        if self.armed {
            self.manager.settle_absent(self.epoch);
        }
    }
}

enum Startup {
    Ready(Connection, InitializeResult),
    Failed(ClientError),
    Cancelled,
}

enum Teardown {
    Done(Deactivation),
    CancelStart(u64),
    Stop(u64, Arc<LanguageClient>),
    AwaitStop(u64),
}

impl<S> ClientManager<S> {
    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> ClientStatus {
        self.lock_state().status()
    }

    /// Receives every status change, starting with the current one.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.inner.status.subscribe()
    }

    /// The spawner used for activations.
    #[must_use]
    pub fn spawner(&self) -> &S {
        &self.inner.spawner
    }

    /// Capabilities announced by the running server.
    #[must_use]
    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        match &*self.lock_state() {
            ClientState::Running { client, .. } => Some(client.capabilities().clone()),
            _ => None,
        }
    }

    /// Number of documents whose open was forwarded to the running server.
    #[must_use]
    pub fn open_documents(&self) -> usize {
        match &*self.lock_state() {
            ClientState::Running { client, .. } => client.documents.len(),
            _ => 0,
        }
    }

    fn publish(&self, state: &ClientState) {
        let epoch = state
            .epoch()
            .unwrap_or_else(|| self.inner.epochs.load(Ordering::SeqCst));
        self.inner.status.send_replace(StatusSnapshot {
            epoch,
            status: state.status(),
        });
    }

    /// Returns to `absent` unless a newer activation owns the state.
    fn settle_absent(&self, epoch: u64) {
        let mut state = self.lock_state();
        if state.is_transient_for(epoch) {
            *state = ClientState::Absent;
            self.publish(&state);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ClientState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: ServerSpawner> ClientManager<S> {
    /// Creates a manager with no client.
    #[must_use]
    pub fn new(spawner: S, timeouts: ClientTimeouts) -> Self {
        let (status, _) = watch::channel(StatusSnapshot {
            epoch: 0,
            status: ClientStatus::Absent,
        });
        Self {
            inner: Arc::new(Shared {
                spawner,
                timeouts,
                state: Mutex::new(ClientState::Absent),
                status,
                epochs: AtomicU64::new(0),
            }),
        }
    }

    /// Starts a client for `descriptor` and waits until it is running.
    ///
    /// Allowed only while the client is absent or failed; other states are
    /// rejected without spawning anything.
    ///
    /// # Errors
    ///
    /// - `ClientError::ActivationRejected` if a client is starting, running
    ///   or stopping.
    /// - `ClientError::ServerNotFound` if the executable cannot be run.
    /// - `ClientError::TransportStartFailure` if spawning, connecting or the
    ///   handshake fails or exceeds the startup budget.
    /// - `ClientError::StartCancelled` if [`Self::deactivate`] cancelled the
    ///   start.
    ///
    /// Every error leaves the client absent.
    pub async fn activate(
        &self,
        descriptor: &ServerDescriptor,
        configuration: ClientConfiguration,
    ) -> Result<(), ClientError> {
        let (epoch, cancel) = self.begin_start()?;
        let settle = SettleOnDrop::new(self, epoch);
        info!(
            target: CLIENT_TARGET,
            epoch,
            client = configuration.id(),
            executable = %descriptor.executable().display(),
            transport = %descriptor.transport(),
            debug = descriptor.is_debug(),
            "starting language client"
        );

        let SpawnedServer {
            process,
            connection,
        } = match self.inner.spawner.spawn(descriptor) {
            Ok(spawned) => spawned,
            Err(error) => {
                self.settle_absent(epoch);
                error!(target: CLIENT_TARGET, epoch, error = %error, "failed to spawn language server");
                return Err(error);
            }
        };

        let budget = self.inner.timeouts.startup;
        let startup = tokio::select! {
            biased;
            () = cancel.cancelled() => Startup::Cancelled,
            result = time::timeout(budget, handshake(connection, &configuration, budget)) => {
                match result {
                    Ok(Ok((connection, initialised))) => Startup::Ready(connection, initialised),
                    Ok(Err(error)) => Startup::Failed(error.into_start_failure()),
                    Err(_) => Startup::Failed(ClientError::start_failure(format!(
                        "server did not initialise within {}ms",
                        budget.as_millis()
                    ))),
                }
            }
            outcome = wait_exit(process.exit_watch()) => Startup::Failed(
                ClientError::start_failure(format!("server exited during startup ({outcome})")),
            ),
        };

        let (connection, initialised) = match startup {
            Startup::Ready(connection, initialised) => (connection, initialised),
            Startup::Cancelled => {
                let outcome = process.terminate(Duration::ZERO).await;
                self.settle_absent(epoch);
                info!(target: CLIENT_TARGET, epoch, %outcome, "language client start cancelled");
                return Err(ClientError::StartCancelled);
            }
            Startup::Failed(error) => {
                let outcome = process.terminate(Duration::ZERO).await;
                self.settle_absent(epoch);
                error!(
                    target: CLIENT_TARGET,
                    epoch,
                    error = %error,
                    %outcome,
                    "language client failed to start"
                );
                return Err(error);
            }
        };

        let client = Arc::new(LanguageClient::new(
            connection,
            process,
            configuration,
            initialised.capabilities,
        ));
        if !self.promote(epoch, &client) {
            let outcome = client.stop(self.inner.timeouts.shutdown).await;
            self.settle_absent(epoch);
            info!(target: CLIENT_TARGET, epoch, %outcome, "language client start cancelled");
            return Err(ClientError::StartCancelled);
        }
        settle.disarm();
        self.spawn_monitor(epoch, &client);
        info!(target: CLIENT_TARGET, epoch, "language client running");
        Ok(())
    }

    /// Stops the client. Always safe to call.
    ///
    /// Completes only after any server process has exited. From `absent`
    /// nothing is contacted; from `failed` the failure is cleared.
    pub async fn deactivate(&self) -> Deactivation {
        loop {
            let teardown = {
                let mut state = self.lock_state();
                match std::mem::replace(&mut *state, ClientState::Absent) {
                    ClientState::Absent => Teardown::Done(Deactivation::NothingToDo),
                    ClientState::Failed { failure } => {
                        self.publish(&state);
                        debug!(target: CLIENT_TARGET, %failure, "cleared failed language client");
                        Teardown::Done(Deactivation::NothingToDo)
                    }
                    ClientState::Starting { epoch, cancel } => {
                        *state = ClientState::Stopping { epoch };
                        self.publish(&state);
                        cancel.cancel();
                        Teardown::CancelStart(epoch)
                    }
                    ClientState::Running { epoch, client } => {
                        *state = ClientState::Stopping { epoch };
                        self.publish(&state);
                        Teardown::Stop(epoch, client)
                    }
                    ClientState::Stopping { epoch } => {
                        *state = ClientState::Stopping { epoch };
                        Teardown::AwaitStop(epoch)
                    }
                }
            };

            match teardown {
                Teardown::Done(result) => return result,
                Teardown::CancelStart(epoch) => {
                    info!(target: CLIENT_TARGET, epoch, "cancelling language client start");
                    self.wait_settled(epoch).await;
                    return Deactivation::Cancelled;
                }
                Teardown::Stop(epoch, client) => {
                    info!(target: CLIENT_TARGET, epoch, "stopping language client");
                    let outcome = self.stop_detached(epoch, client).await;
                    info!(target: CLIENT_TARGET, epoch, %outcome, "language client stopped");
                    return Deactivation::Stopped(outcome);
                }
                Teardown::AwaitStop(epoch) => self.wait_settled(epoch).await,
            }
        }
    }

    /// Forwards `textDocument/didOpen` when the document matches the
    /// selector.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotRunning` without a running client, or the
    /// transport error if sending fails.
    pub async fn did_open(
        &self,
        params: DidOpenTextDocumentParams,
    ) -> Result<Forwarding, ClientError> {
        self.running_client()?.did_open(params).await
    }

    /// Forwards `textDocument/didChange` for documents whose open was
    /// forwarded.
    ///
    /// # Errors
    ///
    /// See [`Self::did_open`].
    pub async fn did_change(
        &self,
        params: DidChangeTextDocumentParams,
    ) -> Result<Forwarding, ClientError> {
        self.running_client()?.did_change(params).await
    }

    /// Forwards `textDocument/didSave` when save forwarding is enabled and
    /// the document's open was forwarded.
    ///
    /// # Errors
    ///
    /// See [`Self::did_open`].
    pub async fn did_save(
        &self,
        params: DidSaveTextDocumentParams,
    ) -> Result<Forwarding, ClientError> {
        self.running_client()?.did_save(params).await
    }

    /// Forwards `textDocument/didClose` for documents whose open was
    /// forwarded.
    ///
    /// # Errors
    ///
    /// See [`Self::did_open`].
    pub async fn did_close(
        &self,
        params: DidCloseTextDocumentParams,
    ) -> Result<Forwarding, ClientError> {
        self.running_client()?.did_close(params).await
    }

    /// Runs the stop sequence on its own task so it completes, and the
    /// state settles, even if the caller stops polling.
    async fn stop_detached(&self, epoch: u64, client: Arc<LanguageClient>) -> ExitOutcome {
        let manager = self.clone();
        let grace = self.inner.timeouts.shutdown;
        let stop = tokio::spawn(async move {
            let _settle = SettleOnDrop::new(&manager, epoch);
            client.stop(grace).await
        });
        match stop.await {
            Ok(outcome) => outcome,
            Err(error) => {
                error!(target: CLIENT_TARGET, epoch, error = %error, "stop task failed");
                ExitOutcome::Unknown
            }
        }
    }

    fn running_client(&self) -> Result<Arc<LanguageClient>, ClientError> {
        match &*self.lock_state() {
            ClientState::Running { client, .. } => Ok(Arc::clone(client)),
            _ => Err(ClientError::NotRunning),
        }
    }

    fn begin_start(&self) -> Result<(u64, CancellationToken), ClientError> {
        let mut state = self.lock_state();
        let status = state.status();
        if !status.accepts_activation() {
            warn!(target: CLIENT_TARGET, %status, "rejecting activation");
            return Err(ClientError::ActivationRejected { status });
        }
        let epoch = self.inner.epochs.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        *state = ClientState::Starting {
            epoch,
            cancel: cancel.clone(),
        };
        self.publish(&state);
        Ok((epoch, cancel))
    }

    fn promote(&self, epoch: u64, client: &Arc<LanguageClient>) -> bool {
        let mut state = self.lock_state();
        if !matches!(&*state, ClientState::Starting { epoch: current, .. } if *current == epoch) {
            return false;
        }
        *state = ClientState::Running {
            epoch,
            client: Arc::clone(client),
        };
        self.publish(&state);
        true
    }

    async fn wait_settled(&self, epoch: u64) {
        let mut status = self.inner.status.subscribe();
        // The sender lives in `self.inner`, so the channel cannot close here.
        drop(
            status
                .wait_for(|snapshot| {
                    snapshot.epoch != epoch || snapshot.status != ClientStatus::Stopping
                })
                .await,
        );
    }

    fn spawn_monitor(&self, epoch: u64, client: &LanguageClient) {
        let shared = Arc::downgrade(&self.inner);
        let closed = client.closed_watch();
        let exit = client.exit_watch();
        tokio::spawn(async move {
            let cause = tokio::select! {
                reason = wait_closed(closed) => FailureCause::TransportClosed(reason),
                _ = wait_exit(exit) => FailureCause::ProcessExited,
            };
            if let Some(inner) = shared.upgrade() {
                Self { inner }.handle_unexpected_stop(epoch, cause).await;
            }
        });
    }

    async fn handle_unexpected_stop(&self, epoch: u64, cause: FailureCause) {
        let client = {
            let mut state = self.lock_state();
            match std::mem::replace(&mut *state, ClientState::Absent) {
                ClientState::Running {
                    epoch: current,
                    client,
                } if current == epoch => {
                    *state = ClientState::Stopping { epoch };
                    self.publish(&state);
                    client
                }
                other => {
                    *state = other;
                    return;
                }
            }
        };

        warn!(target: CLIENT_TARGET, epoch, %cause, "language server stopped unexpectedly");
        let outcome = client.reap(self.inner.timeouts.shutdown).await;
        let failure = ServerFailure { cause, outcome };
        error!(target: CLIENT_TARGET, epoch, %failure, "language client failed");

        let mut state = self.lock_state();
        if state.is_transient_for(epoch) {
            *state = ClientState::Failed { failure };
            self.publish(&state);
        }
    }
}

async fn handshake(
    pending: PendingConnection,
    configuration: &ClientConfiguration,
    timeout: Duration,
) -> Result<(Connection, InitializeResult), ClientError> {
    let streams = pending.accept().await.map_err(|error| {
        ClientError::start_failure_with_source("language server did not connect", error)
    })?;
    let connection = Connection::open(
        streams,
        configuration.synchronization().configuration().cloned(),
    );
    let initialised = connection.initialise(configuration, timeout).await?;
    Ok((connection, initialised))
}

async fn wait_exit(mut exit: watch::Receiver<Option<ExitOutcome>>) -> ExitOutcome {
    match exit.wait_for(Option::is_some).await {
        Ok(outcome) => (*outcome).unwrap_or(ExitOutcome::Unknown),
        Err(_) => ExitOutcome::Unknown,
    }
}

async fn wait_closed(mut closed: watch::Receiver<Option<CloseReason>>) -> String {
    match closed.wait_for(Option::is_some).await {
        Ok(reason) => match &*reason {
            Some(reason) => reason.to_string(),
            None => CloseReason::EndOfStream.to_string(),
        },
        Err(_) => String::from("connection dropped"),
    }
}
