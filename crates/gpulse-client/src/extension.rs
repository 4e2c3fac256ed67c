//! Host-facing activation and deactivation hooks.
//!
//! A host creates an [`ExtensionContext`], calls [`Extension::activate`] when
//! it wants language support, and either calls [`Extension::deactivate`] or
//! disposes the context when it shuts down.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use crate::client::{ClientManager, Deactivation};
use crate::errors::ClientError;
use crate::launcher::{ExecutableResolver, LaunchMode, Launcher};
use crate::process::{ProcessSpawner, ServerSpawner};
use crate::status::ClientStatus;

const EXTENSION_TARGET: &str = "gpulse_client::extension";

/// Boxed cleanup future run by [`ExtensionContext::dispose`].
pub type CleanupFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

type CleanupHook = Box<dyn FnOnce() -> CleanupFuture + Send>;

/// Host-owned activation context.
pub struct ExtensionContext {
    mode: LaunchMode,
    cleanups: Vec<CleanupHook>,
}

impl ExtensionContext {
    /// A context launching the server in `mode`.
    #[must_use]
    pub fn new(mode: LaunchMode) -> Self {
        Self {
            mode,
            cleanups: Vec::new(),
        }
    }

    /// Launch mode requested by the host.
    #[must_use]
    pub fn mode(&self) -> LaunchMode {
        self.mode
    }

    /// Registers a hook to run on [`Self::dispose`].
    pub fn register_cleanup<F, Fut>(&mut self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cleanups
            .push(Box::new(move || -> CleanupFuture { Box::pin(hook()) }));
    }

    /// Number of hooks not yet run.
    #[must_use]
    pub fn pending_cleanups(&self) -> usize {
        self.cleanups.len()
    }

    /// Runs registered hooks, most recent first.
    pub async fn dispose(&mut self) {
        while let Some(hook) = self.cleanups.pop() {
            hook().await;
        }
    }
}

impl Default for ExtensionContext {
    fn default() -> Self {
        Self::new(LaunchMode::Run)
    }
}

impl fmt::Debug for ExtensionContext {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ExtensionContext")
            .field("mode", &self.mode)
            .field("cleanups", &self.cleanups.len())
            .finish()
    }
}

/// Binds a launcher to a lifecycle manager.
#[derive(Debug)]
pub struct Extension<R, S = ProcessSpawner> {
    launcher: Launcher<R>,
    manager: ClientManager<S>,
}

impl<R: ExecutableResolver, S: ServerSpawner> Extension<R, S> {
    /// Pairs `launcher` with `manager`.
    #[must_use]
    pub fn new(launcher: Launcher<R>, manager: ClientManager<S>) -> Self {
        Self { launcher, manager }
    }

    /// The lifecycle manager.
    #[must_use]
    pub fn manager(&self) -> &ClientManager<S> {
        &self.manager
    }

    /// Builds a launch plan, starts the client and registers its
    /// deactivation on `context`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ServerNotFound` before spawning when the
    /// executable cannot be resolved, otherwise the errors of
    /// [`ClientManager::activate`].
    pub async fn activate(&self, context: &mut ExtensionContext) -> Result<(), ClientError> {
        let plan = self.launcher.build()?;
        let descriptor = plan.descriptor(context.mode());
        self.manager.activate(descriptor, plan.client.clone()).await?;

        let manager = self.manager.clone();
        context.register_cleanup(move || async move {
            let result = manager.deactivate().await;
            debug!(target: EXTENSION_TARGET, ?result, "deactivated on context disposal");
        });
        Ok(())
    }

    /// A future that stops the client, or `None` when no client exists.
    #[must_use]
    pub fn deactivate(&self) -> Option<impl Future<Output = Deactivation> + Send + use<R, S>> {
        if self.manager.status() == ClientStatus::Absent {
            return None;
        }
        let manager = self.manager.clone();
        Some(async move { manager.deactivate().await })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn dispose_runs_hooks_in_reverse_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut context = ExtensionContext::default();
        for label in ["first", "second"] {
            let order = Arc::clone(&order);
            context.register_cleanup(move || async move {
                order.lock().expect("lock").push(label);
            });
        }

        context.dispose().await;

        assert_eq!(*order.lock().expect("lock"), vec!["second", "first"]);
        assert_eq!(context.pending_cleanups(), 0);
    }

    #[tokio::test]
    async fn dispose_runs_each_hook_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut context = ExtensionContext::new(LaunchMode::Debug);
        let counter = Arc::clone(&runs);
        context.register_cleanup(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        context.dispose().await;
        context.dispose().await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(context.mode(), LaunchMode::Debug);
    }
}
