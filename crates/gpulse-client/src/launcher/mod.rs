//! Builds server and client configuration for an activation.
//!
//! The launcher resolves the executable and assembles a [`LaunchPlan`]. It
//! never spawns anything; that is the lifecycle manager's job.

mod descriptor;
mod resolve;

use std::path::PathBuf;

use gpulse_config::TransportKind;
use tracing::debug;

pub use descriptor::{DebugOptions, LaunchMode, ServerDescriptor, ServerOptions};
pub use resolve::{ExecutableResolver, FixedPath, InstallRoot, SearchPath, check_executable};

use crate::client::ClientConfiguration;
use crate::errors::ClientError;

/// Log target for launcher operations.
const LAUNCHER_TARGET: &str = "gpulse_client::launcher";

/// Server and client configuration for one activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    /// Run and debug server variants.
    pub server: ServerOptions,
    /// Client identity and document scope.
    pub client: ClientConfiguration,
}

impl LaunchPlan {
    /// The server variant for `mode`.
    #[must_use]
    pub fn descriptor(&self, mode: LaunchMode) -> &ServerDescriptor {
        self.server.select(mode)
    }
}

/// Transport/server launcher.
#[derive(Debug, Clone)]
pub struct Launcher<R> {
    resolver: R,
    client: ClientConfiguration,
    args: Vec<String>,
    transport: TransportKind,
    socket_port: u16,
    debug_options: DebugOptions,
    working_dir: Option<PathBuf>,
}

impl<R: ExecutableResolver> Launcher<R> {
    /// A launcher for the server found by `resolver`, serving `client`.
    /// Defaults to the stdio transport with no extra arguments.
    #[must_use]
    pub fn new(resolver: R, client: ClientConfiguration) -> Self {
        Self {
            resolver,
            client,
            args: Vec::new(),
            transport: TransportKind::default(),
            socket_port: 0,
            debug_options: DebugOptions::default(),
            working_dir: None,
        }
    }

    /// Sets the server arguments.
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Sets the transport kind.
    #[must_use]
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// Sets the TCP port used by the socket transport.
    #[must_use]
    pub fn with_socket_port(mut self, port: u16) -> Self {
        self.socket_port = port;
        self
    }

    /// Sets the options applied to the debug variant.
    #[must_use]
    pub fn with_debug_options(mut self, options: DebugOptions) -> Self {
        self.debug_options = options;
        self
    }

    /// Sets the server's working directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Resolves the executable and assembles the plan.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ServerNotFound` when the executable cannot be
    /// resolved.
    pub fn build(&self) -> Result<LaunchPlan, ClientError> {
        let executable = self.resolver.resolve()?;
        debug!(
            target: LAUNCHER_TARGET,
            client = self.client.id(),
            executable = %executable.display(),
            transport = %self.transport,
            "resolved language server executable"
        );

        let mut run = ServerDescriptor::new(executable, self.transport)
            .with_args(self.args.clone())
            .with_socket_port(self.socket_port);
        if let Some(dir) = &self.working_dir {
            run = run.with_working_dir(dir.clone());
        }
        let debug = run.clone().with_debug_options(self.debug_options.clone());

        Ok(LaunchPlan {
            server: ServerOptions { run, debug },
            client: self.client.clone(),
        })
    }
}
