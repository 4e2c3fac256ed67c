//! Host process for the gpulse language client.
//!
//! The host loads [`gpulse_config::Config`], initialises structured
//! telemetry, activates the client through [`gpulse_client::Extension`] and
//! keeps it running until a termination signal arrives or the server fails.
//! Disposing the extension context on the way out deactivates the client, so
//! the server always receives `shutdown` and `exit` before the host exits.

mod bootstrap;
mod errors;
mod launch;
mod shutdown;
mod telemetry;

pub use bootstrap::{
    CLIENT_ID, CLIENT_NAME, ConfigLoader, ConfiguredResolver, StaticConfigLoader,
    SystemConfigLoader, client_configuration, client_timeouts, launcher,
};
pub use errors::HostError;
pub use launch::{run_host, run_host_with};
pub use shutdown::{ShutdownError, ShutdownSignal, SystemShutdownSignal};
pub use telemetry::{TelemetryError, TelemetryHandle, initialise as initialise_telemetry};

pub(crate) const HOST_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::host");
