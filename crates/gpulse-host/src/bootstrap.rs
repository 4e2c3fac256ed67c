//! Turns loaded configuration into launcher and client settings.

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use gpulse_client::{
    ClientConfiguration, ClientError, ClientTimeouts, DebugOptions, DocumentFilter,
    DocumentSelector, ExecutableResolver, FixedPath, InstallRoot, Launcher, SearchPath,
};
use gpulse_config::{Config, ServerLocation};
use ortho_config::{OrthoConfig, OrthoError};

/// Client identifier announced to the server and used in logs.
pub const CLIENT_ID: &str = "gpulse";

/// Human-readable client name sent in `initialize`.
pub const CLIENT_NAME: &str = "gpulse language server";

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the host configuration.
    ///
    /// # Errors
    ///
    /// Returns the layered loader's error when a source is malformed.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader reading defaults, the configuration file, `GPULSE_*` variables
/// and the process arguments.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        load_from_args(env::args_os())
    }
}

/// Layers `args` (program name first) over the other configuration sources.
fn load_from_args<I, T>(args: I) -> Result<Config, Arc<OrthoError>>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Config::load_from_iter(args)
}

/// Loader returning a configuration that was resolved elsewhere.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps an already resolved configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// The executable resolution strategy selected by configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfiguredResolver {
    /// `server_path` was set.
    Fixed(FixedPath),
    /// `install_root` was set.
    InstallRoot(InstallRoot),
    /// Neither was set; search `PATH`.
    SearchPath(SearchPath),
}

impl ConfiguredResolver {
    /// Picks the strategy for `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        match config.server_location() {
            ServerLocation::Explicit(path) => Self::Fixed(FixedPath::new(path.as_std_path())),
            ServerLocation::InstallRoot { root, name } => {
                Self::InstallRoot(InstallRoot::new(root.as_std_path(), name))
            }
            ServerLocation::SearchPath { name } => Self::SearchPath(SearchPath::new(name)),
        }
    }
}

impl ExecutableResolver for ConfiguredResolver {
    fn resolve(&self) -> Result<PathBuf, ClientError> {
        match self {
            Self::Fixed(resolver) => resolver.resolve(),
            Self::InstallRoot(resolver) => resolver.resolve(),
            Self::SearchPath(resolver) => resolver.resolve(),
        }
    }
}

/// Client settings derived from `document_scheme` and `language_id`.
#[must_use]
pub fn client_configuration(config: &Config) -> ClientConfiguration {
    let selector = DocumentSelector::new(vec![DocumentFilter::new(
        config.document_scheme.as_str(),
        config.language_id.as_str(),
    )]);
    ClientConfiguration::new(CLIENT_ID, CLIENT_NAME, selector)
}

/// Builds the launcher described by `config`.
#[must_use]
pub fn launcher(config: &Config) -> Launcher<ConfiguredResolver> {
    Launcher::new(
        ConfiguredResolver::from_config(config),
        client_configuration(config),
    )
    .with_args(config.server_args.clone())
    .with_transport(config.transport())
    .with_socket_port(config.socket_port)
    .with_debug_options(DebugOptions::new().with_args(config.debug_args.clone()))
}

/// Startup and shutdown budgets from `config`.
#[must_use]
pub fn client_timeouts(config: &Config) -> ClientTimeouts {
    ClientTimeouts::new(config.startup_timeout(), config.shutdown_timeout())
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;
    use gpulse_client::{DocumentRef, LaunchMode, MissingExecutable};
    use gpulse_config::TransportKind;
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn explicit_server_path_is_used_verbatim() {
        let config = Config {
            server_path: Some(Utf8PathBuf::from("/opt/gpulse/bin/gpulse_exe")),
            ..Config::default()
        };

        assert_eq!(
            ConfiguredResolver::from_config(&config),
            ConfiguredResolver::Fixed(FixedPath::new("/opt/gpulse/bin/gpulse_exe"))
        );
    }

    #[rstest]
    fn missing_install_root_executable_is_reported() {
        let root = tempfile::tempdir().expect("tempdir");
        let config = Config {
            install_root: Some(
                Utf8PathBuf::from_path_buf(root.path().to_path_buf()).expect("utf-8 tempdir"),
            ),
            ..Config::default()
        };

        let error = launcher(&config)
            .build()
            .expect_err("launch plan should fail");

        assert!(matches!(
            error,
            ClientError::ServerNotFound {
                reason: MissingExecutable::Absent,
                ..
            }
        ));
    }

    #[rstest]
    fn selector_follows_scheme_and_language() {
        let config = Config {
            document_scheme: String::from("gpulse"),
            language_id: String::from("hlsl"),
            ..Config::default()
        };

        let client = client_configuration(&config);

        assert_eq!(client.id(), CLIENT_ID);
        assert!(
            client
                .document_selector()
                .matches(&DocumentRef::new("gpulse:/kernels/a.hlsl", "hlsl"))
        );
        assert!(
            !client
                .document_selector()
                .matches(&DocumentRef::new("file:///kernels/a.hlsl", "hlsl"))
        );
    }

    #[cfg(unix)]
    #[rstest]
    fn launcher_carries_transport_and_debug_arguments() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().expect("tempdir");
        let executable = root.path().join("gpulse_exe");
        std::fs::write(&executable, "#!/bin/sh\n").expect("write script");
        std::fs::set_permissions(&executable, std::fs::Permissions::from_mode(0o755))
            .expect("chmod");
        let config = Config {
            server_path: Some(Utf8PathBuf::from_path_buf(executable).expect("utf-8 path")),
            server_args: vec![String::from("--lint")],
            debug_args: vec![String::from("--trace")],
            transport: TransportKind::Socket,
            socket_port: 6009,
            ..Config::default()
        };

        let plan = launcher(&config).build().expect("launch plan");
        let run = plan.descriptor(LaunchMode::Run);
        let debug = plan.descriptor(LaunchMode::Debug);

        assert_eq!(run.transport(), TransportKind::Socket);
        assert_eq!(run.socket_port(), 6009);
        assert_eq!(run.launch_args(), vec![String::from("--lint")]);
        assert_eq!(
            debug.launch_args(),
            vec![String::from("--trace"), String::from("--lint")]
        );
    }

    #[rstest]
    fn command_line_arguments_are_layered_over_defaults() {
        let args = ["gpulse-host", "--language-id", "hlsl", "--transport", "socket"];

        let config = load_from_args(args).expect("configuration should load");

        assert_eq!(config.language_id, "hlsl");
        assert_eq!(config.transport(), TransportKind::Socket);
        assert!(config.server_path.is_none());
    }

    #[rstest]
    fn timeouts_follow_configuration() {
        let config = Config {
            startup_timeout_ms: 750,
            shutdown_timeout_ms: 125,
            ..Config::default()
        };

        let timeouts = client_timeouts(&config);

        assert_eq!(timeouts.startup.as_millis(), 750);
        assert_eq!(timeouts.shutdown.as_millis(), 125);
    }
}
