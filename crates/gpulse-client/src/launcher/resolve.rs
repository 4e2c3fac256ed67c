//! Locating the server executable.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::errors::{ClientError, MissingExecutable};

/// Produces the path of the server executable.
pub trait ExecutableResolver {
    /// Resolves and validates the executable path.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ServerNotFound` when no usable executable
    /// exists.
    fn resolve(&self) -> Result<PathBuf, ClientError>;
}

impl<R: ExecutableResolver + ?Sized> ExecutableResolver for Box<R> {
    fn resolve(&self) -> Result<PathBuf, ClientError> {
        (**self).resolve()
    }
}

/// A path used verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedPath {
    path: PathBuf,
}

impl FixedPath {
    /// Resolves to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ExecutableResolver for FixedPath {
    fn resolve(&self) -> Result<PathBuf, ClientError> {
        check_executable(&self.path)?;
        Ok(self.path.clone())
    }
}

/// `<root>/bin/<name>`, the layout of an installed toolchain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRoot {
    root: PathBuf,
    name: String,
}

impl InstallRoot {
    /// Resolves `name` under `root/bin`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            name: name.into(),
        }
    }
}

impl ExecutableResolver for InstallRoot {
    fn resolve(&self) -> Result<PathBuf, ClientError> {
        let path = self
            .root
            .join("bin")
            .join(format!("{}{}", self.name, env::consts::EXE_SUFFIX));
        check_executable(&path)?;
        Ok(path)
    }
}

/// First usable match in a `PATH`-style search list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPath {
    name: String,
    path: Option<OsString>,
}

impl SearchPath {
    /// Searches the process `PATH` at resolution time.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
        }
    }

    /// Searches `path` instead of the process `PATH`.
    #[must_use]
    pub fn with_search_list(mut self, path: impl Into<OsString>) -> Self {
        self.path = Some(path.into());
        self
    }

    fn candidates(&self) -> Vec<PathBuf> {
        let search = self.path.clone().or_else(|| env::var_os("PATH"));
        let file_name = format!("{}{}", self.name, env::consts::EXE_SUFFIX);
        search
            .map(|list| {
                env::split_paths(&list)
                    .filter(|dir| !dir.as_os_str().is_empty())
                    .map(|dir| dir.join(&file_name))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl ExecutableResolver for SearchPath {
    fn resolve(&self) -> Result<PathBuf, ClientError> {
        self.candidates()
            .into_iter()
            .find(|candidate| check_executable(candidate).is_ok())
            .ok_or_else(|| ClientError::ServerNotFound {
                path: PathBuf::from(&self.name),
                reason: MissingExecutable::NotOnPath,
            })
    }
}

/// Checks that `path` names an existing, executable regular file.
///
/// # Errors
///
/// Returns `ClientError::ServerNotFound` describing the first failed check.
pub fn check_executable(path: &Path) -> Result<(), ClientError> {
    let not_found = |reason| ClientError::ServerNotFound {
        path: path.to_path_buf(),
        reason,
    };
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            return Err(not_found(MissingExecutable::Absent));
        }
        Err(_) => return Err(not_found(MissingExecutable::NotExecutable)),
    };
    if !metadata.is_file() {
        return Err(not_found(MissingExecutable::NotAFile));
    }
    if !is_executable(&metadata) {
        return Err(not_found(MissingExecutable::NotExecutable));
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    true
}
