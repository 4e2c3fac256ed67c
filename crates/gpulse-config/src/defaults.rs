use crate::logging::LogFormat;
use crate::transport::TransportKind;

/// Executable name of the WGSL language server.
pub const DEFAULT_SERVER_NAME: &str = "gpulse_exe";

/// Default log filter expression used by the host.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// URI scheme of documents served by default.
pub const DEFAULT_DOCUMENT_SCHEME: &str = "file";

/// Language identifier of documents served by default.
pub const DEFAULT_LANGUAGE_ID: &str = "wgsl";

/// Budget for spawning, connecting and initialising the server.
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 10_000;

/// Budget for the shutdown request and for the process to exit afterwards.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 2_000;

/// Default log filter expression used by the host.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for the host.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default transport between client and server.
pub fn default_transport() -> TransportKind {
    TransportKind::Stdio
}
