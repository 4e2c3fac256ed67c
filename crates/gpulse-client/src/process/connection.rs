//! Byte streams to a server, possibly still waiting for it to connect.

use std::io;
use std::path::PathBuf;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tracing::{debug, warn};

use super::PROCESS_TARGET;
use crate::transport::{BoxedReader, BoxedWriter};

/// Connected read and write halves of a server transport.
pub struct ServerStreams {
    /// Bytes from the server.
    pub reader: BoxedReader,
    /// Bytes to the server.
    pub writer: BoxedWriter,
}

impl ServerStreams {
    /// Boxes the two halves.
    #[must_use]
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

/// A transport that becomes usable once [`PendingConnection::accept`]
/// returns.
pub enum PendingConnection {
    /// Already connected (stdio pipes or in-memory streams).
    Ready(ServerStreams),
    /// Waiting for the server to dial a loopback TCP listener.
    Tcp(TcpListener),
    /// Waiting for the server to dial a Unix domain socket.
    #[cfg(unix)]
    Local {
        /// Bound listener.
        listener: UnixListener,
        /// Socket file, removed once the connection is accepted or dropped.
        path: SocketFile,
    },
}

impl PendingConnection {
    /// Waits for the server side to connect.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised by the listener.
    pub async fn accept(self) -> io::Result<ServerStreams> {
        match self {
            Self::Ready(streams) => Ok(streams),
            Self::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                debug!(target: PROCESS_TARGET, %peer, "language server connected over TCP");
                let (reader, writer) = stream.into_split();
                Ok(ServerStreams::new(reader, writer))
            }
            #[cfg(unix)]
            Self::Local { listener, path } => {
                let (stream, _) = listener.accept().await?;
                debug!(
                    target: PROCESS_TARGET,
                    path = %path.0.display(),
                    "language server connected over local socket"
                );
                drop(path);
                let (reader, writer) = stream.into_split();
                Ok(ServerStreams::new(reader, writer))
            }
        }
    }
}

/// Owns a socket file on disk and removes it on drop.
#[derive(Debug)]
pub struct SocketFile(PathBuf);

impl SocketFile {
    /// Takes ownership of `path`.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self(path)
    }

    /// Location of the socket file.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.0
    }
}

impl Drop for SocketFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => warn!(
                target: PROCESS_TARGET,
                path = %self.0.display(),
                error = %error,
                "failed to remove socket file"
            ),
        }
    }
}
