//! Scenario state shared by the lifecycle and document scoping steps.

use std::cell::RefCell;
use std::future::Future;
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

use super::{FakeSpawner, ServerBehaviour, descriptor, fake_manager, wgsl_client};
use crate::client::{ClientManager, Deactivation, Forwarding};
use crate::errors::ClientError;
use crate::status::ClientStatus;

/// State carried between steps of one scenario.
pub struct LifecycleWorld {
    runtime: Runtime,
    pub spawner: FakeSpawner,
    pub manager: ClientManager<FakeSpawner>,
    pub activation: Option<Result<(), ClientError>>,
    pub repeat_activation: Option<Result<(), ClientError>>,
    pub deactivation: Option<Deactivation>,
    pub background: Option<JoinHandle<Result<(), ClientError>>>,
    pub forwarding: Option<Result<Forwarding, ClientError>>,
}

impl LifecycleWorld {
    fn new() -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("failed to build runtime");
        let (spawner, manager) = fake_manager(ServerBehaviour::Healthy);
        Self {
            runtime,
            spawner,
            manager,
            activation: None,
            repeat_activation: None,
            deactivation: None,
            background: None,
            forwarding: None,
        }
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn activate(&self) -> Result<(), ClientError> {
        self.block_on(self.manager.activate(&descriptor(), wgsl_client()))
    }

    pub fn deactivate(&self) -> Deactivation {
        self.block_on(self.manager.deactivate())
    }

    /// Starts an activation on the runtime and returns once it is starting.
    pub fn activate_in_background(&mut self) {
        let manager = self.manager.clone();
        let handle = self
            .runtime
            .spawn(async move { manager.activate(&descriptor(), wgsl_client()).await });
        self.background = Some(handle);
        self.wait_for_status(|status| *status == ClientStatus::Starting);
    }

    /// Blocks until the published status satisfies `predicate`.
    pub fn wait_for_status(&self, predicate: impl Fn(&ClientStatus) -> bool) {
        let mut status = self.manager.subscribe();
        self.block_on(async {
            tokio::time::timeout(
                Duration::from_secs(5),
                status.wait_for(|snapshot| predicate(&snapshot.status)),
            )
            .await
            .expect("status did not change in time")
            .map(|_| ())
            .expect("status channel closed");
        });
    }
}

/// A fresh world backed by a healthy in-memory server.
pub fn lifecycle_world() -> RefCell<LifecycleWorld> {
    RefCell::new(LifecycleWorld::new())
}
