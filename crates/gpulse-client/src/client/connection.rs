//! JSON-RPC session with a connected server.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use lsp_types::{
    ClientCapabilities, ClientInfo, DidChangeConfigurationParams, InitializeParams,
    InitializeResult, InitializedParams, MessageType, ServerCapabilities,
    TextDocumentClientCapabilities, TextDocumentSyncClientCapabilities, WorkspaceClientCapabilities,
};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, trace, warn};

use super::CLIENT_TARGET;
use super::configuration::ClientConfiguration;
use crate::errors::ClientError;
use crate::jsonrpc::{
    ClientResponse, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    RequestIds, ServerNotification, ServerRequest,
};
use crate::process::{ExitOutcome, ProcessHandle, SERVER_TARGET, ServerStreams};
use crate::transport::{BoxedReader, BoxedWriter, FramedReader, FramedWriter};

/// Why the message stream stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CloseReason {
    EndOfStream,
    Failed(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndOfStream => formatter.write_str("end of stream"),
            Self::Failed(reason) => formatter.write_str(reason),
        }
    }
}

#[derive(Default)]
struct Pending {
    waiters: HashMap<i64, oneshot::Sender<JsonRpcResponse>>,
    closed: bool,
}

/// State shared between callers and the reader task.
struct Outbound {
    writer: tokio::sync::Mutex<FramedWriter<BoxedWriter>>,
    ids: RequestIds,
    pending: Mutex<Pending>,
    settings: Option<Value>,
}

impl Outbound {
    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn send<T: Serialize>(&self, message: &T) -> Result<(), ClientError> {
        let payload = serde_json::to_vec(message)?;
        let mut writer = self.writer.lock().await;
        writer.send(&payload).await?;
        Ok(())
    }

    fn complete(&self, response: JsonRpcResponse) {
        let Some(id) = response.id else {
            warn!(target: CLIENT_TARGET, "discarding response without an id");
            return;
        };
        match self.pending().waiters.remove(&id) {
            // The caller may have timed out already.
            Some(waiter) => drop(waiter.send(response)),
            None => debug!(target: CLIENT_TARGET, id, "discarding response to unknown request"),
        }
    }

    fn close_pending(&self) {
        let mut pending = self.pending();
        pending.closed = true;
        pending.waiters.clear();
    }

    async fn answer(&self, request: ServerRequest) {
        let ServerRequest { id, method, params } = request;
        let response = match method.as_str() {
            "client/registerCapability"
            | "client/unregisterCapability"
            | "window/workDoneProgress/create"
            | "window/showMessageRequest" => ClientResponse::success(id, Value::Null),
            "workspace/configuration" => {
                ClientResponse::success(id, self.configuration_items(params.as_ref()))
            }
            _ => {
                debug!(target: CLIENT_TARGET, method = %method, "rejecting unsupported server request");
                ClientResponse::method_not_found(id, &method)
            }
        };
        if let Err(error) = self.send(&response).await {
            warn!(
                target: CLIENT_TARGET,
                method = %method,
                error = %error,
                "failed to answer server request"
            );
        }
    }

    fn configuration_items(&self, params: Option<&Value>) -> Value {
        let count = params
            .and_then(|params| params.get("items"))
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        let item = self.settings.clone().unwrap_or(Value::Null);
        Value::Array(vec![item; count])
    }
}

fn log_server_notification(notification: &ServerNotification) {
    let params = notification.params.as_ref();
    match notification.method.as_str() {
        "window/logMessage" | "window/showMessage" => {
            let message = params
                .and_then(|params| params.get("message"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let kind = params
                .and_then(|params| params.get("type"))
                .and_then(|kind| serde_json::from_value::<MessageType>(kind.clone()).ok())
                .unwrap_or(MessageType::LOG);
            match kind {
                MessageType::ERROR => error!(target: SERVER_TARGET, "{message}"),
                MessageType::WARNING => warn!(target: SERVER_TARGET, "{message}"),
                MessageType::INFO => info!(target: SERVER_TARGET, "{message}"),
                _ => debug!(target: SERVER_TARGET, "{message}"),
            }
        }
        "textDocument/publishDiagnostics" => {
            let uri = params
                .and_then(|params| params.get("uri"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let count = params
                .and_then(|params| params.get("diagnostics"))
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            debug!(target: CLIENT_TARGET, uri, count, "server published diagnostics");
        }
        method => trace!(target: CLIENT_TARGET, method, "ignoring server notification"),
    }
}

async fn read_loop(
    mut reader: FramedReader<BoxedReader>,
    outbound: Arc<Outbound>,
    closed: watch::Sender<Option<CloseReason>>,
) {
    let reason = loop {
        match reader.receive().await {
            Ok(Some(payload)) => match JsonRpcMessage::from_bytes(&payload) {
                Ok(JsonRpcMessage::Response(response)) => outbound.complete(response),
                Ok(JsonRpcMessage::ServerRequest(request)) => {
                    let outbound = Arc::clone(&outbound);
                    tokio::spawn(async move { outbound.answer(request).await });
                }
                Ok(JsonRpcMessage::Notification(notification)) => {
                    log_server_notification(&notification);
                }
                Err(error) => {
                    warn!(target: CLIENT_TARGET, error = %error, "discarding undecodable message");
                }
            },
            Ok(None) => break CloseReason::EndOfStream,
            Err(error) => {
                warn!(target: CLIENT_TARGET, error = %error, "server transport failed");
                break CloseReason::Failed(error.to_string());
            }
        }
    };
    debug!(target: CLIENT_TARGET, %reason, "server connection closed");
    outbound.close_pending();
    closed.send_replace(Some(reason));
}

/// A framed JSON-RPC connection. Dropping it stops the reader task.
pub(crate) struct Connection {
    outbound: Arc<Outbound>,
    closed: watch::Receiver<Option<CloseReason>>,
    reader_task: JoinHandle<()>,
}

impl Connection {
    /// Starts reading from `streams`. `settings` answers
    /// `workspace/configuration` requests.
    pub(crate) fn open(streams: ServerStreams, settings: Option<Value>) -> Self {
        let ServerStreams { reader, writer } = streams;
        let outbound = Arc::new(Outbound {
            writer: tokio::sync::Mutex::new(FramedWriter::new(writer)),
            ids: RequestIds::new(),
            pending: Mutex::new(Pending::default()),
            settings,
        });
        let (closed_tx, closed_rx) = watch::channel(None);
        let reader_task = tokio::spawn(read_loop(
            FramedReader::new(reader),
            Arc::clone(&outbound),
            closed_tx,
        ));
        Self {
            outbound,
            closed: closed_rx,
            reader_task,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.borrow().is_some()
    }

    pub(crate) fn closed_watch(&self) -> watch::Receiver<Option<CloseReason>> {
        self.closed.clone()
    }

    /// Sends a request and waits up to `timeout` for its response.
    pub(crate) async fn request<P: Serialize>(
        &self,
        method: &str,
        params: P,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        let id = self.outbound.ids.next_id();
        let request = JsonRpcRequest::new(id, method, to_params(params)?);
        let (sender, receiver) = oneshot::channel();
        {
            let mut pending = self.outbound.pending();
            if pending.closed {
                return Err(ClientError::ConnectionClosed);
            }
            pending.waiters.insert(id, sender);
        }

        debug!(target: CLIENT_TARGET, method, id, "sending request");
        if let Err(error) = self.outbound.send(&request).await {
            self.outbound.pending().waiters.remove(&id);
            return Err(error);
        }

        let response = match time::timeout(timeout, receiver).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(ClientError::ConnectionClosed),
            Err(_) => {
                self.outbound.pending().waiters.remove(&id);
                return Err(ClientError::RequestTimeout {
                    method: method.to_owned(),
                    timeout_ms: timeout.as_millis(),
                });
            }
        };

        if let Some(error) = response.error {
            return Err(ClientError::from_jsonrpc(error));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Sends a notification.
    pub(crate) async fn notify<P: Serialize>(
        &self,
        method: &str,
        params: P,
    ) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }
        trace!(target: CLIENT_TARGET, method, "sending notification");
        self.outbound
            .send(&JsonRpcNotification::new(method, to_params(params)?))
            .await
    }

    /// Performs the `initialize` / `initialized` exchange and pushes
    /// configuration settings when that feature is enabled.
    pub(crate) async fn initialise(
        &self,
        configuration: &ClientConfiguration,
        timeout: Duration,
    ) -> Result<InitializeResult, ClientError> {
        let params = InitializeParams {
            process_id: Some(std::process::id()),
            client_info: Some(ClientInfo {
                name: configuration.name().to_owned(),
                version: Some(env!("CARGO_PKG_VERSION").to_owned()),
            }),
            initialization_options: configuration.initialization_options().cloned(),
            capabilities: ClientCapabilities {
                text_document: Some(TextDocumentClientCapabilities {
                    synchronization: Some(TextDocumentSyncClientCapabilities {
                        did_save: Some(
                            configuration
                                .synchronization()
                                .save_include_text()
                                .is_some(),
                        ),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                workspace: Some(WorkspaceClientCapabilities {
                    configuration: Some(configuration.synchronization().configuration().is_some()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };

        let value = self.request("initialize", params, timeout).await?;
        let result: InitializeResult = serde_json::from_value(value)?;
        debug!(
            target: CLIENT_TARGET,
            client = configuration.id(),
            server = result.server_info.as_ref().map(|info| info.name.as_str()),
            "server initialised"
        );

        self.notify("initialized", InitializedParams {}).await?;
        if let Some(settings) = configuration.synchronization().configuration() {
            self.notify(
                "workspace/didChangeConfiguration",
                DidChangeConfigurationParams {
                    settings: settings.clone(),
                },
            )
            .await?;
        }
        Ok(result)
    }

    async fn close_writer(&self) {
        let mut writer = self.outbound.writer.lock().await;
        if let Err(error) = writer.close().await {
            debug!(target: CLIENT_TARGET, error = %error, "failed to close server input");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

fn to_params<P: Serialize>(params: P) -> Result<Option<Value>, ClientError> {
    match serde_json::to_value(params)? {
        Value::Null => Ok(None),
        value => Ok(Some(value)),
    }
}

/// A running language client: an initialised connection plus the server
/// process behind it.
pub(crate) struct LanguageClient {
    connection: Connection,
    process: Mutex<Option<ProcessHandle>>,
    exit: watch::Receiver<Option<ExitOutcome>>,
    configuration: ClientConfiguration,
    capabilities: ServerCapabilities,
    pub(super) documents: super::documents::OpenDocuments,
}

impl LanguageClient {
    pub(crate) fn new(
        connection: Connection,
        process: ProcessHandle,
        configuration: ClientConfiguration,
        capabilities: ServerCapabilities,
    ) -> Self {
        let exit = process.exit_watch();
        Self {
            connection,
            process: Mutex::new(Some(process)),
            exit,
            configuration,
            capabilities,
            documents: super::documents::OpenDocuments::default(),
        }
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.connection
    }

    pub(crate) fn configuration(&self) -> &ClientConfiguration {
        &self.configuration
    }

    pub(crate) fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    pub(crate) fn closed_watch(&self) -> watch::Receiver<Option<CloseReason>> {
        self.connection.closed_watch()
    }

    pub(crate) fn exit_watch(&self) -> watch::Receiver<Option<ExitOutcome>> {
        self.exit.clone()
    }

    fn take_process(&self) -> Option<ProcessHandle> {
        self.process
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }

    /// Graceful stop: `shutdown`, `exit`, end of input, then wait for the
    /// process (killing it once `timeout` elapses).
    pub(crate) async fn stop(&self, timeout: Duration) -> ExitOutcome {
        if !self.connection.is_closed() {
            if let Err(error) = self.connection.request("shutdown", (), timeout).await {
                debug!(target: CLIENT_TARGET, operation = "shutdown", error = %error, "shutdown request failed");
            }
            if let Err(error) = self.connection.notify("exit", ()).await {
                debug!(target: CLIENT_TARGET, operation = "exit", error = %error, "exit notification failed");
            }
            self.connection.close_writer().await;
        }
        self.reap(timeout).await
    }

    /// Waits up to `grace` for the process to go away, then kills it.
    pub(crate) async fn reap(&self, grace: Duration) -> ExitOutcome {
        match self.take_process() {
            Some(process) => process.terminate(grace).await,
            None => (*self.exit.borrow()).unwrap_or(ExitOutcome::Unknown),
        }
    }
}
