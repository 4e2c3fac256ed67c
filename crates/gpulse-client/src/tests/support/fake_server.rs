//! In-memory language servers reached over `tokio::io::duplex`.

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Value, json};
use tokio::io::DuplexStream;
use tokio::sync::watch;

use crate::errors::{ClientError, MissingExecutable};
use crate::jsonrpc::JsonRpcMessage;
use crate::launcher::ServerDescriptor;
use crate::process::{
    ExitOutcome, PendingConnection, ProcessControl, ProcessHandle, ServerSpawner, ServerStreams,
    SpawnedServer,
};
use crate::transport::{FramedReader, FramedWriter};

/// How spawned servers behave.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ServerBehaviour {
    /// Answers every request.
    #[default]
    Healthy,
    /// Answers `initialize` with an error.
    RejectsInitialize,
    /// Never answers `initialize`.
    NeverAnswers,
    /// Spawning fails as if the executable did not exist.
    Missing,
}

#[derive(Debug, Default)]
struct Counters {
    spawned: usize,
    live: usize,
    peak_live: usize,
}

#[derive(Debug, Default)]
struct FakeState {
    behaviour: Mutex<ServerBehaviour>,
    counters: Mutex<Counters>,
    received: Mutex<Vec<(String, Option<Value>)>>,
    crash_switches: Mutex<Vec<watch::Sender<Option<i32>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("fake server lock poisoned")
}

/// Spawns in-memory servers and counts how many are alive.
#[derive(Debug, Clone, Default)]
pub struct FakeSpawner {
    state: Arc<FakeState>,
}

impl FakeSpawner {
    pub fn set_behaviour(&self, behaviour: ServerBehaviour) {
        *lock(&self.state.behaviour) = behaviour;
    }

    pub fn spawned(&self) -> usize {
        lock(&self.state.counters).spawned
    }

    pub fn live(&self) -> usize {
        lock(&self.state.counters).live
    }

    pub fn peak_live(&self) -> usize {
        lock(&self.state.counters).peak_live
    }

    /// Methods received by all servers, in arrival order.
    pub fn received(&self) -> Vec<String> {
        lock(&self.state.received)
            .iter()
            .map(|(method, _)| method.clone())
            .collect()
    }

    pub fn count_received(&self, method: &str) -> usize {
        lock(&self.state.received)
            .iter()
            .filter(|(received, _)| received == method)
            .count()
    }

    pub fn last_params(&self, method: &str) -> Option<Value> {
        lock(&self.state.received)
            .iter()
            .rev()
            .find(|(received, _)| received == method)
            .and_then(|(_, params)| params.clone())
    }

    /// Makes the most recently spawned server exit with `code`.
    pub fn crash_latest(&self, code: i32) {
        let switches = lock(&self.state.crash_switches);
        let switch = switches.last().expect("no server was spawned");
        switch.send_replace(Some(code));
    }
}

impl ServerSpawner for FakeSpawner {
    fn spawn(&self, descriptor: &ServerDescriptor) -> Result<SpawnedServer, ClientError> {
        let behaviour = *lock(&self.state.behaviour);
        if behaviour == ServerBehaviour::Missing {
            return Err(ClientError::ServerNotFound {
                path: descriptor.executable().to_path_buf(),
                reason: MissingExecutable::Absent,
            });
        }

        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(client_side);
        let (process, control) = ProcessHandle::detached(None);
        let (crash_tx, crash_rx) = watch::channel(None);
        {
            let mut counters = lock(&self.state.counters);
            counters.spawned += 1;
            counters.live += 1;
            counters.peak_live = counters.peak_live.max(counters.live);
        }
        lock(&self.state.crash_switches).push(crash_tx);

        tokio::spawn(serve(
            server_side,
            control,
            crash_rx,
            behaviour,
            Arc::clone(&self.state),
        ));

        Ok(SpawnedServer {
            process,
            connection: PendingConnection::Ready(ServerStreams::new(reader, writer)),
        })
    }
}

enum Reply {
    Send(Value),
    Nothing,
    Exit,
}

async fn serve(
    stream: DuplexStream,
    mut control: ProcessControl,
    mut crash: watch::Receiver<Option<i32>>,
    behaviour: ServerBehaviour,
    state: Arc<FakeState>,
) {
    let (read, write) = tokio::io::split(stream);
    let mut reader = FramedReader::new(read);
    let mut writer = FramedWriter::new(write);

    let outcome = loop {
        tokio::select! {
            () = control.kill_requested() => break ExitOutcome::Signal(9),
            code = crash_requested(&mut crash) => break ExitOutcome::Code(code),
            frame = reader.receive() => {
                let Ok(Some(payload)) = frame else {
                    break ExitOutcome::Code(0);
                };
                match respond(&payload, behaviour, &state) {
                    Reply::Send(message) => {
                        if writer.send(message.to_string().as_bytes()).await.is_err() {
                            break ExitOutcome::Code(1);
                        }
                    }
                    Reply::Nothing => {}
                    Reply::Exit => break ExitOutcome::Code(0),
                }
            }
        }
    };

    drop(reader);
    drop(writer);
    lock(&state.counters).live -= 1;
    control.exit(outcome);
}

async fn crash_requested(crash: &mut watch::Receiver<Option<i32>>) -> i32 {
    let code = match crash.wait_for(Option::is_some).await {
        Ok(code) => *code,
        Err(_) => None,
    };
    match code {
        Some(code) => code,
        None => std::future::pending().await,
    }
}

fn respond(payload: &[u8], behaviour: ServerBehaviour, state: &FakeState) -> Reply {
    let Ok(message) = JsonRpcMessage::from_bytes(payload) else {
        return Reply::Nothing;
    };
    match message {
        // Client requests carry an id and a method.
        JsonRpcMessage::ServerRequest(request) => {
            lock(&state.received).push((request.method.clone(), request.params.clone()));
            let id = request.id;
            match (request.method.as_str(), behaviour) {
                ("initialize", ServerBehaviour::NeverAnswers) => Reply::Nothing,
                ("initialize", ServerBehaviour::RejectsInitialize) => Reply::Send(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32603, "message": "initialisation refused"}
                })),
                ("initialize", _) => Reply::Send(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "capabilities": {"textDocumentSync": 1},
                        "serverInfo": {"name": "fake-gpulse"}
                    }
                })),
                _ => Reply::Send(json!({"jsonrpc": "2.0", "id": id, "result": null})),
            }
        }
        JsonRpcMessage::Notification(notification) => {
            let exit = notification.method == "exit";
            lock(&state.received).push((notification.method, notification.params));
            if exit { Reply::Exit } else { Reply::Nothing }
        }
        JsonRpcMessage::Response(_) => Reply::Nothing,
    }
}
