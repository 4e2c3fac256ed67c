//! Lifecycle core of the gpulse language client.
#![deny(missing_docs)]
//!
//! The crate launches an out-of-process language server, connects a framed
//! JSON-RPC transport to it, scopes which documents it serves and tears it
//! down cleanly. [`Launcher`] turns static configuration into a
//! [`LaunchPlan`]; [`ClientManager`] owns the single client built from it and
//! exposes `activate`/`deactivate`; [`Extension`] and [`ExtensionContext`]
//! are the hooks a host calls. Process creation sits behind
//! [`ServerSpawner`] so tests can run servers in memory.

mod client;
mod errors;
mod extension;
pub mod jsonrpc;
mod launcher;
mod process;
mod selector;
mod status;
pub mod transport;

pub use client::{
    ClientConfiguration, ClientManager, ClientTimeouts, Deactivation, Forwarding, SyncFeature,
    SynchronizationOptions,
};
pub use errors::{ClientError, MissingExecutable};
pub use extension::{CleanupFuture, Extension, ExtensionContext};
pub use launcher::{
    DebugOptions, ExecutableResolver, FixedPath, InstallRoot, LaunchMode, LaunchPlan, Launcher,
    SearchPath, ServerDescriptor, ServerOptions, check_executable,
};
pub use process::{
    ExitOutcome, PendingConnection, ProcessControl, ProcessHandle, ProcessSpawner, ServerSpawner,
    ServerStreams, SocketFile, SpawnedServer,
};
pub use selector::{DocumentFilter, DocumentRef, DocumentSelector};
pub use status::{ClientStatus, FailureCause, ServerFailure, StatusSnapshot};

/// Log target carrying the server's own output: its stderr lines and
/// `window/logMessage` notifications.
pub const SERVER_LOG_TARGET: &str = process::SERVER_TARGET;

#[cfg(test)]
mod tests;
