//! Spawning language server processes and wiring their transports.

mod connection;
mod handle;

use std::io;
use std::net::{Ipv4Addr, TcpListener as StdTcpListener};
use std::process::Stdio;

use gpulse_config::TransportKind;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpListener;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub use connection::{PendingConnection, ServerStreams, SocketFile};
pub use handle::{ExitOutcome, ProcessControl, ProcessHandle};

use crate::errors::{ClientError, MissingExecutable};
use crate::launcher::ServerDescriptor;

/// Log target for process management.
pub(crate) const PROCESS_TARGET: &str = "gpulse_client::process";

/// Log target for output produced by the server itself.
pub(crate) const SERVER_TARGET: &str = "gpulse_client::server";

/// A freshly started server: its process and its not-yet-connected
/// transport.
pub struct SpawnedServer {
    /// The server process.
    pub process: ProcessHandle,
    /// Transport to the server.
    pub connection: PendingConnection,
}

/// Starts server processes.
///
/// The lifecycle manager calls this once per accepted activation. Tests
/// substitute in-memory servers.
pub trait ServerSpawner: Send + Sync + 'static {
    /// Spawns a server for `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ServerNotFound` if the executable cannot be run
    /// and `ClientError::TransportStartFailure` for other failures.
    fn spawn(&self, descriptor: &ServerDescriptor) -> Result<SpawnedServer, ClientError>;
}

/// Spawns real operating system processes with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSpawner;

impl ServerSpawner for ProcessSpawner {
    fn spawn(&self, descriptor: &ServerDescriptor) -> Result<SpawnedServer, ClientError> {
        let (transport_arg, pending) = prepare_transport(descriptor)?;

        let mut command = Command::new(descriptor.executable());
        command
            .args(descriptor.launch_args())
            .arg(&transport_arg)
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = descriptor.working_dir() {
            command.current_dir(dir);
        }
        if let Some(debug) = descriptor.debug_options() {
            command.envs(debug.env());
        }
        match pending {
            Pending::Stdio => command.stdin(Stdio::piped()).stdout(Stdio::piped()),
            Pending::Listening(_) => command.stdin(Stdio::null()).stdout(Stdio::piped()),
        };

        debug!(
            target: PROCESS_TARGET,
            command = %descriptor.executable().display(),
            args = ?descriptor.launch_args(),
            transport = %descriptor.transport(),
            transport_arg = %transport_arg,
            "spawning language server process"
        );

        let mut child = command
            .spawn()
            .map_err(|error| spawn_error(descriptor, error))?;
        let pid = child.id();

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, pid, "stderr"));
        }

        let connection = match pending {
            Pending::Stdio => {
                let stdin = child.stdin.take();
                let stdout = child.stdout.take();
                let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
                    return Err(ClientError::start_failure(
                        "server stdio pipes were not captured",
                    ));
                };
                PendingConnection::Ready(ServerStreams::new(stdout, stdin))
            }
            Pending::Listening(connection) => {
                if let Some(stdout) = child.stdout.take() {
                    tokio::spawn(forward_output(stdout, pid, "stdout"));
                }
                connection
            }
        };

        info!(
            target: PROCESS_TARGET,
            pid,
            transport = %descriptor.transport(),
            "language server process spawned"
        );

        Ok(SpawnedServer {
            process: ProcessHandle::supervise(child),
            connection,
        })
    }
}

enum Pending {
    Stdio,
    Listening(PendingConnection),
}

fn prepare_transport(descriptor: &ServerDescriptor) -> Result<(String, Pending), ClientError> {
    let flag = descriptor.transport().flag();
    match descriptor.transport() {
        TransportKind::Stdio => Ok((flag.to_owned(), Pending::Stdio)),
        TransportKind::Socket => {
            let listener = bind_loopback(descriptor.socket_port()).map_err(|error| {
                ClientError::start_failure_with_source("failed to bind TCP listener", error)
            })?;
            let port = listener
                .local_addr()
                .map_err(|error| {
                    ClientError::start_failure_with_source("failed to read listener address", error)
                })?
                .port();
            Ok((
                format!("{flag}={port}"),
                Pending::Listening(PendingConnection::Tcp(listener)),
            ))
        }
        TransportKind::Ipc => bind_local_socket(flag),
    }
}

fn bind_loopback(port: u16) -> io::Result<TcpListener> {
    let listener = StdTcpListener::bind((Ipv4Addr::LOCALHOST, port))?;
    listener.set_nonblocking(true)?;
    TcpListener::from_std(listener)
}

#[cfg(unix)]
fn bind_local_socket(flag: &str) -> Result<(String, Pending), ClientError> {
    use std::sync::atomic::{AtomicU64, Ordering};

    use tokio::net::UnixListener;

    static NEXT_SOCKET: AtomicU64 = AtomicU64::new(0);

    let path = std::env::temp_dir().join(format!(
        "gpulse-{}-{}.sock",
        std::process::id(),
        NEXT_SOCKET.fetch_add(1, Ordering::Relaxed)
    ));
    let file = SocketFile::new(path);
    let listener = UnixListener::bind(file.path()).map_err(|error| {
        ClientError::start_failure_with_source("failed to bind local socket", error)
    })?;
    let argument = format!("{flag}={}", file.path().display());
    Ok((
        argument,
        Pending::Listening(PendingConnection::Local {
            listener,
            path: file,
        }),
    ))
}

#[cfg(not(unix))]
fn bind_local_socket(_flag: &str) -> Result<(String, Pending), ClientError> {
    Err(ClientError::start_failure(
        "the ipc transport requires Unix domain sockets",
    ))
}

fn spawn_error(descriptor: &ServerDescriptor, error: io::Error) -> ClientError {
    let reason = match error.kind() {
        io::ErrorKind::NotFound => Some(MissingExecutable::Absent),
        io::ErrorKind::PermissionDenied => Some(MissingExecutable::NotExecutable),
        _ => None,
    };
    match reason {
        Some(reason) => ClientError::ServerNotFound {
            path: descriptor.executable().to_path_buf(),
            reason,
        },
        None => ClientError::start_failure_with_source("failed to spawn language server", error),
    }
}

/// Forwards each line the server writes to the server log target.
async fn forward_output<R>(stream: R, pid: Option<u32>, stream_name: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => info!(target: SERVER_TARGET, pid, stream = stream_name, "{line}"),
            Ok(None) => break,
            Err(error) => {
                warn!(
                    target: PROCESS_TARGET,
                    pid,
                    stream = stream_name,
                    error = %error,
                    "stopped forwarding server output"
                );
                break;
            }
        }
    }
}
