//! Immutable description of how to start a language server.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use gpulse_config::TransportKind;

/// Extra arguments and environment used only by the debug variant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugOptions {
    args: Vec<String>,
    env: BTreeMap<String, String>,
}

impl DebugOptions {
    /// Empty debug options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends launch arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets an environment variable for the server process.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Debug launch arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Debug environment variables.
    #[must_use]
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }
}

/// Which server variant to launch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LaunchMode {
    /// Normal operation.
    #[default]
    Run,
    /// Debug variant with [`DebugOptions`] applied.
    Debug,
}

impl From<bool> for LaunchMode {
    fn from(debug: bool) -> Self {
        if debug { Self::Debug } else { Self::Run }
    }
}

/// Everything needed to spawn one server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    executable: PathBuf,
    args: Vec<String>,
    transport: TransportKind,
    socket_port: u16,
    debug_options: Option<DebugOptions>,
    working_dir: Option<PathBuf>,
}

impl ServerDescriptor {
    /// A descriptor with no arguments, an ephemeral socket port and no debug
    /// options.
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>, transport: TransportKind) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            transport,
            socket_port: 0,
            debug_options: None,
            working_dir: None,
        }
    }

    /// Replaces the server arguments.
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Sets the TCP port used by [`TransportKind::Socket`].
    #[must_use]
    pub fn with_socket_port(mut self, port: u16) -> Self {
        self.socket_port = port;
        self
    }

    /// Marks the descriptor as the debug variant.
    #[must_use]
    pub fn with_debug_options(mut self, options: DebugOptions) -> Self {
        self.debug_options = Some(options);
        self
    }

    /// Sets the server's working directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Resolved executable path.
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Server arguments, excluding debug and transport arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Transport carrying protocol messages.
    #[must_use]
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Requested TCP port; `0` lets the OS choose.
    #[must_use]
    pub fn socket_port(&self) -> u16 {
        self.socket_port
    }

    /// Debug options, present only on the debug variant.
    #[must_use]
    pub fn debug_options(&self) -> Option<&DebugOptions> {
        self.debug_options.as_ref()
    }

    /// Working directory for the server process.
    #[must_use]
    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Whether this is the debug variant.
    #[must_use]
    pub fn is_debug(&self) -> bool {
        self.debug_options.is_some()
    }

    /// Arguments in launch order: debug arguments, then server arguments.
    /// The transport argument is appended by the spawner once the endpoint
    /// is known.
    #[must_use]
    pub fn launch_args(&self) -> Vec<String> {
        self.debug_options
            .iter()
            .flat_map(|options| options.args.iter())
            .chain(self.args.iter())
            .cloned()
            .collect()
    }
}

/// The run and debug variants of a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// Normal launch.
    pub run: ServerDescriptor,
    /// Debug launch.
    pub debug: ServerDescriptor,
}

impl ServerOptions {
    /// Picks the variant for `mode`.
    #[must_use]
    pub fn select(&self, mode: LaunchMode) -> &ServerDescriptor {
        match mode {
            LaunchMode::Run => &self.run,
            LaunchMode::Debug => &self.debug,
        }
    }
}
