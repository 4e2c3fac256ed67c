//! Byte-stream transports a language server can be reached through.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Channel used to carry framed protocol messages to the server.
///
/// The launcher appends the matching argument to the server command line:
/// `--stdio`, `--pipe=<path>` or `--socket=<port>`.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum TransportKind {
    /// The child's standard input and output.
    #[default]
    Stdio,
    /// A local domain socket the server connects back to.
    Ipc,
    /// A loopback TCP socket the server connects back to.
    Socket,
}

impl TransportKind {
    /// Command-line flag announcing the transport to the server, without any
    /// endpoint value.
    #[must_use]
    pub const fn flag(self) -> &'static str {
        match self {
            Self::Stdio => "--stdio",
            Self::Ipc => "--pipe",
            Self::Socket => "--socket",
        }
    }
}

/// Errors encountered while parsing a [`TransportKind`] from text.
pub type TransportKindParseError = strum::ParseError;
