//! Shared configuration for the gpulse language client and its host.
//!
//! Values are layered by `ortho_config`: built-in defaults, then a
//! configuration file (`--config-path` or `GPULSE_CONFIG_PATH`), then
//! `GPULSE_*` environment variables, then command-line flags.

mod defaults;
mod logging;
mod transport;

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_DOCUMENT_SCHEME, DEFAULT_LANGUAGE_ID, DEFAULT_LOG_FILTER, DEFAULT_SERVER_NAME,
    DEFAULT_SHUTDOWN_TIMEOUT_MS, DEFAULT_STARTUP_TIMEOUT_MS, default_log_filter,
    default_log_format, default_transport,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use transport::{TransportKind, TransportKindParseError};

/// Resolved configuration for launching and scoping the language server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "GPULSE")]
#[serde(default)]
pub struct Config {
    /// Explicit path to the server executable. Takes precedence over every
    /// other resolution strategy.
    pub server_path: Option<Utf8PathBuf>,
    /// Installation root searched for `bin/<server_name>`.
    pub install_root: Option<Utf8PathBuf>,
    /// Executable name used with `install_root` or a `PATH` search.
    pub server_name: String,
    /// Additional arguments passed to the server.
    pub server_args: Vec<String>,
    /// Transport carrying protocol messages.
    pub transport: TransportKind,
    /// TCP port for the `socket` transport; `0` selects an ephemeral port.
    pub socket_port: u16,
    /// Launch the debug variant of the server.
    pub debug: bool,
    /// Extra arguments used only by the debug variant.
    pub debug_args: Vec<String>,
    /// URI scheme of documents routed to the server.
    pub document_scheme: String,
    /// Language identifier of documents routed to the server.
    pub language_id: String,
    /// Milliseconds allowed for spawning, connecting and initialising.
    pub startup_timeout_ms: u64,
    /// Milliseconds allowed for the shutdown request and process exit.
    pub shutdown_timeout_ms: u64,
    /// Tracing filter expression.
    pub log_filter: String,
    /// Tracing output format.
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_path: None,
            install_root: None,
            server_name: DEFAULT_SERVER_NAME.to_owned(),
            server_args: Vec::new(),
            transport: default_transport(),
            socket_port: 0,
            debug: false,
            debug_args: Vec::new(),
            document_scheme: DEFAULT_DOCUMENT_SCHEME.to_owned(),
            language_id: DEFAULT_LANGUAGE_ID.to_owned(),
            startup_timeout_ms: DEFAULT_STARTUP_TIMEOUT_MS,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            log_filter: default_log_filter().to_owned(),
            log_format: default_log_format(),
        }
    }
}

/// Strategy used to find the server executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerLocation<'a> {
    /// A path given verbatim.
    Explicit(&'a Utf8Path),
    /// `<root>/bin/<name>`.
    InstallRoot {
        /// Installation root.
        root: &'a Utf8Path,
        /// Executable name.
        name: &'a str,
    },
    /// First match for `name` in the `PATH` environment variable.
    SearchPath {
        /// Executable name.
        name: &'a str,
    },
}

impl Config {
    /// Selects the executable resolution strategy from the configured fields.
    #[must_use]
    pub fn server_location(&self) -> ServerLocation<'_> {
        if let Some(path) = self.server_path.as_deref() {
            return ServerLocation::Explicit(path);
        }
        match self.install_root.as_deref() {
            Some(root) => ServerLocation::InstallRoot {
                root,
                name: self.server_name.as_str(),
            },
            None => ServerLocation::SearchPath {
                name: self.server_name.as_str(),
            },
        }
    }

    /// Transport carrying protocol messages.
    #[must_use]
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Startup budget as a [`Duration`].
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Shutdown budget as a [`Duration`].
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Tracing output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
