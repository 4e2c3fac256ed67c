//! Supervision of a spawned server process.
//!
//! A background task owns the [`tokio::process::Child`] and publishes its exit
//! on a watch channel; [`ProcessHandle`] is the caller's view of it.

use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::{oneshot, watch};
use tokio::time;
use tracing::{debug, warn};

use super::PROCESS_TARGET;

/// How a server process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited with a status code.
    Code(i32),
    /// Terminated by a signal.
    Signal(i32),
    /// The status could not be observed.
    Unknown,
}

impl ExitOutcome {
    /// Whether the process exited with status zero.
    #[must_use]
    pub fn success(self) -> bool {
        matches!(self, Self::Code(0))
    }
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signal(signal);
            }
        }
        Self::Unknown
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(formatter, "exit code {code}"),
            Self::Signal(signal) => write!(formatter, "signal {signal}"),
            Self::Unknown => formatter.write_str("unknown exit status"),
        }
    }
}

/// Handle to a running (or exited) server process.
///
/// Dropping the handle kills the process if it is still running.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    kill: Option<oneshot::Sender<()>>,
    exit: watch::Receiver<Option<ExitOutcome>>,
}

/// The process side of a [`ProcessHandle::detached`] pair.
///
/// In-process servers use it to learn about kill requests and to report
/// their exit.
#[derive(Debug)]
pub struct ProcessControl {
    kill: Option<oneshot::Receiver<()>>,
    exit: watch::Sender<Option<ExitOutcome>>,
}

impl ProcessHandle {
    /// Takes ownership of `child` and reaps it in a background task.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn supervise(mut child: Child) -> Self {
        let pid = child.id();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = watch::channel(None);

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    if let Err(error) = child.start_kill() {
                        warn!(
                            target: PROCESS_TARGET,
                            pid,
                            error = %error,
                            "failed to kill language server"
                        );
                    }
                    child.wait().await
                }
            };
            let outcome = match status {
                Ok(status) => ExitOutcome::from(status),
                Err(error) => {
                    warn!(
                        target: PROCESS_TARGET,
                        pid,
                        error = %error,
                        "failed to reap language server"
                    );
                    ExitOutcome::Unknown
                }
            };
            debug!(target: PROCESS_TARGET, pid, %outcome, "language server process ended");
            exit_tx.send_replace(Some(outcome));
        });

        Self {
            pid,
            kill: Some(kill_tx),
            exit: exit_rx,
        }
    }

    /// Creates a handle whose "process" is driven through the returned
    /// [`ProcessControl`].
    #[must_use]
    pub fn detached(pid: Option<u32>) -> (Self, ProcessControl) {
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        let handle = Self {
            pid,
            kill: Some(kill_tx),
            exit: exit_rx,
        };
        let control = ProcessControl {
            kill: Some(kill_rx),
            exit: exit_tx,
        };
        (handle, control)
    }

    /// Operating system process ID, if known.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// The exit outcome if the process has already ended.
    #[must_use]
    pub fn exit_outcome(&self) -> Option<ExitOutcome> {
        *self.exit.borrow()
    }

    /// A receiver that observes the exit, for monitors that outlive a borrow
    /// of the handle.
    #[must_use]
    pub fn exit_watch(&self) -> watch::Receiver<Option<ExitOutcome>> {
        self.exit.clone()
    }

    /// Requests a forced kill. Repeated calls are no-ops.
    pub fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            // The supervisor may already have finished.
            drop(kill.send(()));
        }
    }

    /// Waits for the process to end.
    pub async fn wait(&mut self) -> ExitOutcome {
        match self.exit.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).unwrap_or(ExitOutcome::Unknown),
            Err(_) => ExitOutcome::Unknown,
        }
    }

    /// Waits up to `grace` for the process to exit on its own, then kills
    /// it and reaps it.
    pub async fn terminate(mut self, grace: Duration) -> ExitOutcome {
        if let Some(outcome) = self.exit_outcome() {
            debug!(target: PROCESS_TARGET, pid = self.pid, %outcome, "language server exited");
            return outcome;
        }

        if let Ok(outcome) = time::timeout(grace, self.wait()).await {
            debug!(
                target: PROCESS_TARGET,
                pid = self.pid,
                %outcome,
                "language server exited during grace period"
            );
            return outcome;
        }

        warn!(
            target: PROCESS_TARGET,
            pid = self.pid,
            grace_ms = grace.as_millis(),
            "language server did not exit gracefully, killing"
        );
        self.kill();
        self.wait().await
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.exit.borrow().is_none() {
            self.kill();
        }
    }
}

impl ProcessControl {
    /// Resolves once the handle asks for a kill or is dropped.
    pub async fn kill_requested(&mut self) {
        if let Some(kill) = self.kill.as_mut() {
            // An error means the handle was dropped, which is a kill as well.
            drop(kill.await);
            self.kill = None;
        }
    }

    /// Reports the process exit to the handle.
    pub fn exit(&self, outcome: ExitOutcome) {
        self.exit.send_replace(Some(outcome));
    }
}
