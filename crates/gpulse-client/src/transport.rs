//! LSP header framing over an arbitrary byte stream.
//!
//! Every transport kind (stdio pipes, local sockets, TCP) carries the same
//! framing:
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <payload>
//! ```

use std::io;

use thiserror::Error;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};

/// Largest payload accepted from a server.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Longest header line, terminator included, accepted from a server.
pub const MAX_HEADER_LINE_BYTES: usize = 8 * 1024;

const HEADER_LINE_LIMIT: u64 = MAX_HEADER_LINE_BYTES as u64;

/// Read half of a server connection.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a server connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Transport-layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error during read or write.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Missing Content-Length header.
    #[error("missing Content-Length header")]
    MissingContentLength,

    /// A header line was not of the form `Name: value`, or the length was
    /// not a number.
    #[error("invalid header line '{0}'")]
    InvalidHeader(String),

    /// A header line ran past [`MAX_HEADER_LINE_BYTES`] without ending.
    #[error("header line exceeds the {limit} byte limit")]
    HeaderTooLong {
        /// Configured limit.
        limit: usize,
    },

    /// The announced payload is larger than [`MAX_FRAME_BYTES`].
    #[error("frame of {length} bytes exceeds the {limit} byte limit")]
    FrameTooLarge {
        /// Announced payload length.
        length: usize,
        /// Configured limit.
        limit: usize,
    },
}

/// Reads LSP-framed messages from a byte stream.
pub struct FramedReader<R> {
    reader: BufReader<R>,
}

impl<R> FramedReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Wraps the read half of a connection.
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Receives the next message payload.
    ///
    /// Returns `Ok(None)` when the peer closes the stream between frames.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::MissingContentLength` if no Content-Length
    /// header is found, `TransportError::InvalidHeader` for malformed header
    /// lines and `TransportError::Io` if the stream ends inside a frame.
    pub async fn receive(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let Some(content_length) = self.read_headers().await? else {
            return Ok(None);
        };
        if content_length > MAX_FRAME_BYTES {
            return Err(TransportError::FrameTooLarge {
                length: content_length,
                limit: MAX_FRAME_BYTES,
            });
        }
        let mut content = vec![0u8; content_length];
        self.reader.read_exact(&mut content).await?;
        Ok(Some(content))
    }

    async fn read_headers(&mut self) -> Result<Option<usize>, TransportError> {
        let mut content_length: Option<usize> = None;
        let mut saw_header = false;

        loop {
            let mut line = String::new();
            let bytes_read = (&mut self.reader)
                .take(HEADER_LINE_LIMIT)
                .read_line(&mut line)
                .await?;
            if bytes_read == 0 {
                if saw_header {
                    return Err(TransportError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed while reading headers",
                    )));
                }
                return Ok(None);
            }
            if bytes_read == MAX_HEADER_LINE_BYTES && !line.ends_with('\n') {
                return Err(TransportError::HeaderTooLong {
                    limit: MAX_HEADER_LINE_BYTES,
                });
            }
            saw_header = true;

            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                break;
            }

            let Some((name, value)) = trimmed.split_once(':') else {
                return Err(TransportError::InvalidHeader(trimmed.to_owned()));
            };
            if name.trim().eq_ignore_ascii_case("content-length") {
                let length = value
                    .trim()
                    .parse()
                    .map_err(|_| TransportError::InvalidHeader(trimmed.to_owned()))?;
                content_length = Some(length);
            }
            // Content-Type and unknown headers are ignored
        }

        content_length
            .map(Some)
            .ok_or(TransportError::MissingContentLength)
    }
}

/// Writes LSP-framed messages to a byte stream.
pub struct FramedWriter<W> {
    writer: BufWriter<W>,
}

impl<W> FramedWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Wraps the write half of a connection.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Sends one framed message and flushes it.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Io` if writing to the stream fails.
    pub async fn send(&mut self, message: &[u8]) -> Result<(), TransportError> {
        let header = format!("Content-Length: {}\r\n\r\n", message.len());
        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(message).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Flushes and shuts the write half down, signalling end of input.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Io` if the stream cannot be shut down.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.writer.shutdown().await?;
        Ok(())
    }

    /// Returns the wrapped stream. Buffered bytes are always flushed by
    /// [`Self::send`], so nothing is lost.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}
