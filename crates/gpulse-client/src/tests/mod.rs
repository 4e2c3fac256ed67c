//! Crate-level lifecycle and BDD tests run against in-memory servers.

use std::time::Duration;

use serde_json::json;

use crate::client::{ClientManager, ClientTimeouts, Deactivation, Forwarding};
use crate::errors::ClientError;
use crate::process::ExitOutcome;
use crate::status::{ClientStatus, FailureCause};

mod support;

use support::{
    ServerBehaviour, change_params, close_params, descriptor, fake_manager, open_params,
    save_params, wgsl_client,
};

async fn wait_for_status(
    manager: &ClientManager<support::FakeSpawner>,
    predicate: impl Fn(&ClientStatus) -> bool,
) -> ClientStatus {
    let mut status = manager.subscribe();
    let snapshot = tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|snapshot| predicate(&snapshot.status)),
    )
    .await
    .expect("status did not change in time")
    .expect("status channel closed")
    .clone();
    snapshot.status
}

async fn wait_until_no_servers_live(spawner: &support::FakeSpawner) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while spawner.live() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("servers did not exit in time");
}

#[tokio::test]
async fn deactivating_an_absent_client_contacts_nothing() {
    let (spawner, manager) = fake_manager(ServerBehaviour::Healthy);

    assert_eq!(manager.deactivate().await, Deactivation::NothingToDo);
    assert_eq!(spawner.spawned(), 0);
    assert_eq!(manager.status(), ClientStatus::Absent);
}

#[tokio::test]
async fn activation_and_deactivation_follow_the_lsp_handshake() {
    let (spawner, manager) = fake_manager(ServerBehaviour::Healthy);

    manager
        .activate(&descriptor(), wgsl_client())
        .await
        .expect("activation failed");
    assert_eq!(manager.status(), ClientStatus::Running);
    assert!(manager.server_capabilities().is_some());

    let result = manager.deactivate().await;

    assert_eq!(result, Deactivation::Stopped(ExitOutcome::Code(0)));
    assert_eq!(manager.status(), ClientStatus::Absent);
    assert_eq!(spawner.live(), 0);
    assert_eq!(
        spawner.received(),
        [
            "initialize",
            "initialized",
            "workspace/didChangeConfiguration",
            "shutdown",
            "exit"
        ]
    );
}

#[tokio::test]
async fn initialize_carries_client_identity_and_capabilities() {
    let (spawner, manager) = fake_manager(ServerBehaviour::Healthy);
    let configuration =
        wgsl_client().with_initialization_options(json!({"validation": "strict"}));

    manager
        .activate(&descriptor(), configuration)
        .await
        .expect("activation failed");
    // The shutdown round trip flushes the configuration push.
    assert!(matches!(manager.deactivate().await, Deactivation::Stopped(_)));
    let params = spawner.last_params("initialize").expect("no initialize params");
    let settings = spawner
        .last_params("workspace/didChangeConfiguration")
        .expect("no configuration push");

    assert_eq!(params["clientInfo"]["name"], "gpulse language server");
    assert_eq!(params["initializationOptions"], json!({"validation": "strict"}));
    assert_eq!(
        params["capabilities"]["textDocument"]["synchronization"]["didSave"],
        true
    );
    assert_eq!(params["capabilities"]["workspace"]["configuration"], true);
    assert_eq!(settings["settings"], json!({"gpulse": {"lint": true}}));
}

#[tokio::test]
async fn missing_executable_leaves_the_client_absent() {
    let (spawner, manager) = fake_manager(ServerBehaviour::Missing);

    let error = manager
        .activate(&descriptor(), wgsl_client())
        .await
        .expect_err("activation should fail");

    assert!(error.is_server_not_found());
    assert_eq!(manager.status(), ClientStatus::Absent);
    assert_eq!(spawner.spawned(), 0);
}

#[tokio::test]
async fn repeated_activation_is_rejected_without_spawning() {
    let (spawner, manager) = fake_manager(ServerBehaviour::Healthy);
    manager
        .activate(&descriptor(), wgsl_client())
        .await
        .expect("activation failed");

    let error = manager
        .activate(&descriptor(), wgsl_client())
        .await
        .expect_err("second activation should be rejected");

    assert!(matches!(
        error,
        ClientError::ActivationRejected {
            status: ClientStatus::Running
        }
    ));
    assert_eq!(spawner.spawned(), 1);
    assert!(matches!(manager.deactivate().await, Deactivation::Stopped(_)));
}

#[tokio::test]
async fn concurrent_activations_start_one_server() {
    let (spawner, manager) = fake_manager(ServerBehaviour::Healthy);

    let descriptor = descriptor();

    let (first, second) = tokio::join!(
        manager.activate(&descriptor, wgsl_client()),
        manager.activate(&descriptor, wgsl_client()),
    );

    assert_eq!(
        usize::from(first.is_ok()) + usize::from(second.is_ok()),
        1,
        "exactly one activation should win: {first:?} / {second:?}"
    );
    assert!(matches!(
        first.err().or(second.err()),
        Some(ClientError::ActivationRejected {
            status: ClientStatus::Starting
        })
    ));
    assert_eq!(spawner.spawned(), 1);
    assert!(matches!(manager.deactivate().await, Deactivation::Stopped(_)));
}

#[tokio::test]
async fn unexpected_exit_marks_the_client_failed() {
    let (spawner, manager) = fake_manager(ServerBehaviour::Healthy);
    manager
        .activate(&descriptor(), wgsl_client())
        .await
        .expect("activation failed");

    spawner.crash_latest(3);
    let status = wait_for_status(&manager, |status| matches!(status, ClientStatus::Failed(_))).await;

    let ClientStatus::Failed(failure) = status else {
        panic!("expected a failed status");
    };
    assert_eq!(failure.outcome, ExitOutcome::Code(3));
    assert!(matches!(
        failure.cause,
        FailureCause::ProcessExited | FailureCause::TransportClosed(_)
    ));
    assert!(matches!(
        manager.did_open(open_params("file:///shaders/a.wgsl", "wgsl")).await,
        Err(ClientError::NotRunning)
    ));

    assert_eq!(manager.deactivate().await, Deactivation::NothingToDo);
    assert_eq!(manager.status(), ClientStatus::Absent);
    assert_eq!(spawner.count_received("shutdown"), 0);
}

#[tokio::test]
async fn a_failed_client_can_be_activated_again() {
    let (spawner, manager) = fake_manager(ServerBehaviour::Healthy);
    manager
        .activate(&descriptor(), wgsl_client())
        .await
        .expect("activation failed");
    spawner.crash_latest(3);
    wait_for_status(&manager, |status| matches!(status, ClientStatus::Failed(_))).await;

    manager
        .activate(&descriptor(), wgsl_client())
        .await
        .expect("re-activation failed");

    assert_eq!(manager.status(), ClientStatus::Running);
    assert_eq!(spawner.spawned(), 2);
    assert_eq!(spawner.live(), 1);
    assert!(matches!(manager.deactivate().await, Deactivation::Stopped(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deactivation_cancels_a_pending_start() {
    let (spawner, manager) = fake_manager(ServerBehaviour::NeverAnswers);
    let background = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.activate(&descriptor(), wgsl_client()).await })
    };
    wait_for_status(&manager, |status| *status == ClientStatus::Starting).await;

    assert_eq!(manager.deactivate().await, Deactivation::Cancelled);

    let result = background.await.expect("activation task panicked");
    assert!(matches!(result, Err(ClientError::StartCancelled)));
    assert_eq!(manager.status(), ClientStatus::Absent);
    assert_eq!(spawner.live(), 0);
}

#[tokio::test]
async fn abandoned_activation_leaves_the_client_absent() {
    let (spawner, manager) = fake_manager(ServerBehaviour::NeverAnswers);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(100),
        manager.activate(&descriptor(), wgsl_client()),
    )
    .await;

    assert!(abandoned.is_err(), "activation should still have been pending");
    assert_eq!(manager.status(), ClientStatus::Absent);
    assert_eq!(manager.deactivate().await, Deactivation::NothingToDo);
    wait_until_no_servers_live(&spawner).await;

    spawner.set_behaviour(ServerBehaviour::Healthy);
    manager
        .activate(&descriptor(), wgsl_client())
        .await
        .expect("re-activation failed");
    assert_eq!(manager.status(), ClientStatus::Running);
    assert!(matches!(manager.deactivate().await, Deactivation::Stopped(_)));
}

#[tokio::test]
async fn abandoned_deactivation_still_stops_the_server() {
    let (spawner, manager) = fake_manager(ServerBehaviour::Healthy);
    manager
        .activate(&descriptor(), wgsl_client())
        .await
        .expect("activation failed");

    // A zero timeout polls the deactivation once and then drops it.
    let abandoned = tokio::time::timeout(Duration::ZERO, manager.deactivate()).await;
    assert!(abandoned.is_err(), "deactivation should still have been pending");
    assert_eq!(manager.status(), ClientStatus::Stopping);

    let second = tokio::time::timeout(Duration::from_secs(5), manager.deactivate())
        .await
        .expect("second deactivation did not finish");

    assert_eq!(second, Deactivation::NothingToDo);
    assert_eq!(manager.status(), ClientStatus::Absent);
    assert_eq!(spawner.count_received("shutdown"), 1);
    assert_eq!(spawner.live(), 0);
    manager
        .activate(&descriptor(), wgsl_client())
        .await
        .expect("re-activation failed");
    assert!(matches!(manager.deactivate().await, Deactivation::Stopped(_)));
}

#[tokio::test]
async fn handshake_timeout_terminates_the_server() {
    let spawner = support::FakeSpawner::default();
    spawner.set_behaviour(ServerBehaviour::NeverAnswers);
    let manager = ClientManager::new(
        spawner.clone(),
        ClientTimeouts::new(Duration::from_millis(100), Duration::from_millis(100)),
    );

    let error = manager
        .activate(&descriptor(), wgsl_client())
        .await
        .expect_err("activation should time out");

    assert!(matches!(error, ClientError::TransportStartFailure { .. }));
    assert_eq!(manager.status(), ClientStatus::Absent);
    assert_eq!(spawner.live(), 0);
}

#[tokio::test]
async fn rejected_initialisation_is_a_start_failure() {
    let (spawner, manager) = fake_manager(ServerBehaviour::RejectsInitialize);

    let error = manager
        .activate(&descriptor(), wgsl_client())
        .await
        .expect_err("activation should fail");

    assert!(matches!(error, ClientError::TransportStartFailure { .. }));
    assert_eq!(manager.status(), ClientStatus::Absent);
    assert_eq!(spawner.live(), 0);
}

#[tokio::test]
async fn concurrent_deactivations_stop_the_server_once() {
    let (spawner, manager) = fake_manager(ServerBehaviour::Healthy);
    manager
        .activate(&descriptor(), wgsl_client())
        .await
        .expect("activation failed");

    let (first, second) = tokio::join!(manager.deactivate(), manager.deactivate());

    assert!(
        matches!(
            (first, second),
            (Deactivation::Stopped(_), _) | (_, Deactivation::Stopped(_))
        ),
        "one deactivation should stop the server: {first:?} / {second:?}"
    );
    assert_eq!(spawner.count_received("shutdown"), 1);
    assert_eq!(manager.status(), ClientStatus::Absent);
}

#[tokio::test]
async fn document_events_outside_the_selector_are_filtered() {
    let (spawner, manager) = fake_manager(ServerBehaviour::Healthy);
    manager
        .activate(&descriptor(), wgsl_client())
        .await
        .expect("activation failed");
    let shader = "file:///shaders/a.wgsl";
    let scratch = "untitled:Untitled-1";

    let opened = manager.did_open(open_params(shader, "wgsl")).await;
    let untitled = manager.did_open(open_params(scratch, "wgsl")).await;
    let plaintext = manager
        .did_open(open_params("file:///notes.txt", "plaintext"))
        .await;
    let changed_scratch = manager.did_change(change_params(scratch)).await;
    let changed = manager.did_change(change_params(shader)).await;
    let saved = manager.did_save(save_params(shader)).await;
    assert_eq!(manager.open_documents(), 1);
    let closed = manager.did_close(close_params(shader)).await;
    let closed_again = manager.did_close(close_params(shader)).await;
    // The shutdown round trip flushes every notification sent before it.
    assert!(matches!(manager.deactivate().await, Deactivation::Stopped(_)));

    assert_eq!(opened.expect("open failed"), Forwarding::Forwarded);
    assert_eq!(untitled.expect("open failed"), Forwarding::Filtered);
    assert_eq!(plaintext.expect("open failed"), Forwarding::Filtered);
    assert_eq!(changed_scratch.expect("change failed"), Forwarding::Filtered);
    assert_eq!(changed.expect("change failed"), Forwarding::Forwarded);
    assert_eq!(saved.expect("save failed"), Forwarding::Forwarded);
    assert_eq!(closed.expect("close failed"), Forwarding::Forwarded);
    assert_eq!(closed_again.expect("close failed"), Forwarding::Filtered);

    assert_eq!(spawner.count_received("textDocument/didOpen"), 1);
    assert_eq!(spawner.count_received("textDocument/didChange"), 1);
    assert_eq!(spawner.count_received("textDocument/didClose"), 1);
    let save = spawner
        .last_params("textDocument/didSave")
        .expect("save was not forwarded");
    assert!(save.get("text").is_none(), "save should omit text: {save}");
}

#[tokio::test]
async fn saves_are_filtered_without_save_forwarding() {
    let (spawner, manager) = fake_manager(ServerBehaviour::Healthy);
    let configuration = crate::client::ClientConfiguration::new(
        "gpulse",
        "gpulse language server",
        wgsl_client().document_selector().clone(),
    );
    manager
        .activate(&descriptor(), configuration)
        .await
        .expect("activation failed");
    let shader = "file:///shaders/a.wgsl";

    let opened = manager.did_open(open_params(shader, "wgsl")).await;
    let saved = manager.did_save(save_params(shader)).await;
    assert!(matches!(manager.deactivate().await, Deactivation::Stopped(_)));

    assert_eq!(opened.expect("open failed"), Forwarding::Forwarded);
    assert_eq!(saved.expect("save failed"), Forwarding::Filtered);
    assert_eq!(spawner.count_received("textDocument/didSave"), 0);
    assert_eq!(spawner.count_received("workspace/didChangeConfiguration"), 0);
}

#[tokio::test]
async fn document_events_require_a_running_client() {
    let (_, manager) = fake_manager(ServerBehaviour::Healthy);

    let result = manager
        .did_open(open_params("file:///shaders/a.wgsl", "wgsl"))
        .await;

    assert!(matches!(result, Err(ClientError::NotRunning)));
}
