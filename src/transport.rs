//! JSON-RPC transport: the trait seam the supervisor drives, and the
//! child-process stdio implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};

use crate::codec::{MessageReader, MessageWriter};
use crate::protocol::{Notification, Request};

/// Bound on how long an outbound request may wait for its response.
const RESPONSE_TIMEOUT_SECS: u64 = 30;

/// Grace period for the child to exit on its own during `stop`.
const STOP_TIMEOUT_SECS: u64 = 2;

/// Outbound frame queue depth.
const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

/// Handles a server-initiated notification.
pub type NotificationHandler = Box<dyn Fn(Option<serde_json::Value>) + Send + Sync>;

/// Answers a server-initiated request with a result value. Handlers are
/// synchronous by type: they run on the message delivery path, which later
/// messages (including readiness signals) depend on, so they must never
/// block.
pub type RequestHandler = Box<dyn Fn(Option<serde_json::Value>) -> serde_json::Value + Send + Sync>;

/// The protocol transport the session supervisor drives.
///
/// Handlers must be registered before `start`; the supervisor's state
/// machine enforces that ordering so no early server message is lost.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Register a handler for a server-initiated notification method.
    fn on_notification(&mut self, method: &str, handler: NotificationHandler);

    /// Register a handler for a server-initiated request method.
    fn on_request(&mut self, method: &str, handler: RequestHandler);

    /// Start delivering messages. Registration is closed from here on.
    async fn start(&mut self) -> Result<()>;

    /// Send a request and block until its response arrives (bounded).
    /// Returns the whole response frame, error member included.
    async fn request(
        &mut self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value>;

    /// Send a notification. Fire-and-forget, no response expected.
    async fn notify(
        &mut self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<()>;

    /// Tear the transport down, terminating the server process.
    async fn stop(&mut self);
}

#[derive(Default)]
struct HandlerTable {
    notifications: HashMap<String, NotificationHandler>,
    requests: HashMap<String, RequestHandler>,
}

enum Incoming {
    Response {
        id: u64,
        body: serde_json::Value,
    },
    ServerRequest {
        id: serde_json::Value,
        method: String,
        params: Option<serde_json::Value>,
    },
    ServerNotification {
        method: String,
        params: Option<serde_json::Value>,
    },
}

fn classify_frame(frame: &serde_json::Value) -> Option<Incoming> {
    let id = frame.get("id");
    let method = frame.get("method").and_then(|m| m.as_str());
    let is_reply = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method, is_reply) {
        (Some(id), None, true) => Some(Incoming::Response {
            id: id.as_u64()?,
            body: frame.clone(),
        }),
        (Some(id), Some(method), _) => Some(Incoming::ServerRequest {
            id: id.clone(),
            method: method.to_string(),
            params: frame.get("params").cloned(),
        }),
        (None, Some(method), _) => Some(Incoming::ServerNotification {
            method: method.to_string(),
            params: frame.get("params").cloned(),
        }),
        _ => None,
    }
}

type PendingMap = Arc<tokio::sync::Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>>;

struct Running {
    child: Child,
    outbound: mpsc::Sender<serde_json::Value>,
    pending: PendingMap,
}

/// Child-process transport: spawns the server with piped stdio and runs one
/// reader task and one writer task over Content-Length frames.
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    workspace_root: PathBuf,
    handlers: Option<HandlerTable>,
    running: Option<Running>,
    next_id: u64,
}

impl StdioTransport {
    #[must_use]
    pub fn new(command: &str, args: &[String], workspace_root: &Path) -> Self {
        Self {
            command: command.to_string(),
            args: args.to_vec(),
            workspace_root: workspace_root.to_path_buf(),
            handlers: Some(HandlerTable::default()),
            running: None,
            next_id: 1,
        }
    }

    async fn dispatch(
        frame: &serde_json::Value,
        pending: &tokio::sync::Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>,
        handlers: &HandlerTable,
        outbound: &mpsc::Sender<serde_json::Value>,
    ) {
        let Some(incoming) = classify_frame(frame) else {
            tracing::trace!("discarding malformed JSON-RPC frame");
            return;
        };

        match incoming {
            Incoming::Response { id, body } => {
                let waiter = pending.lock().await.remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(body);
                    }
                    None => tracing::trace!(id, "response for unknown request id"),
                }
            }
            Incoming::ServerRequest { id, method, params } => {
                // An unanswered request stalls the server, so always reply.
                let reply = match handlers.requests.get(&method) {
                    Some(handler) => {
                        tracing::debug!(%method, "answering server request");
                        serde_json::json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "result": handler(params)
                        })
                    }
                    None => {
                        tracing::debug!(%method, "no handler for server request, replying method not found");
                        serde_json::json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "error": {
                                "code": -32601,
                                "message": format!("method not found: {method}")
                            }
                        })
                    }
                };
                let _ = outbound.send(reply).await;
            }
            Incoming::ServerNotification { method, params } => {
                match handlers.notifications.get(&method) {
                    Some(handler) => handler(params),
                    None => tracing::trace!(%method, "discarding unhandled notification"),
                }
            }
        }
    }
}

impl Transport for StdioTransport {
    fn on_notification(&mut self, method: &str, handler: NotificationHandler) {
        match self.handlers.as_mut() {
            Some(table) => {
                table.notifications.insert(method.to_string(), handler);
            }
            None => tracing::warn!(%method, "notification handler registered after start, dropping"),
        }
    }

    fn on_request(&mut self, method: &str, handler: RequestHandler) {
        match self.handlers.as_mut() {
            Some(table) => {
                table.requests.insert(method.to_string(), handler);
            }
            None => tracing::warn!(%method, "request handler registered after start, dropping"),
        }
    }

    async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            bail!("transport already started");
        }
        let handlers = Arc::new(self.handlers.take().unwrap_or_default());

        let program = which::which(&self.command)
            .with_context(|| format!("{} not found in PATH", self.command))?;
        let mut child = Command::new(&program)
            .args(&self.args)
            .current_dir(&self.workspace_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", self.command))?;

        let stdout = child.stdout.take().context("child has no stdout")?;
        let stdin = child.stdin.take().context("child has no stdin")?;

        let pending: PendingMap = Arc::new(tokio::sync::Mutex::new(HashMap::new()));
        let (outbound, mut outbound_rx) =
            mpsc::channel::<serde_json::Value>(OUTBOUND_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut writer = MessageWriter::new(stdin);
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = writer.write_message(&frame).await {
                    tracing::warn!("transport write failed: {e:#}");
                    break;
                }
            }
        });

        let reader_pending = Arc::clone(&pending);
        let reader_outbound = outbound.clone();
        tokio::spawn(async move {
            let mut reader = MessageReader::new(stdout);
            loop {
                match reader.read_message().await {
                    Ok(Some(frame)) => {
                        Self::dispatch(&frame, &reader_pending, &handlers, &reader_outbound).await;
                    }
                    Ok(None) => {
                        tracing::info!("server closed its stdout");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("transport read failed: {e:#}");
                        break;
                    }
                }
            }
            // No response can arrive anymore; release any waiter.
            reader_pending.lock().await.clear();
        });

        self.running = Some(Running {
            child,
            outbound,
            pending,
        });
        Ok(())
    }

    async fn request(
        &mut self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let id = self.next_id;
        self.next_id += 1;

        let running = self.running.as_ref().context("transport not started")?;
        let (tx, rx) = oneshot::channel();
        running.pending.lock().await.insert(id, tx);

        let frame =
            serde_json::to_value(Request::new(id, method, params)).context("serializing request")?;
        if running.outbound.send(frame).await.is_err() {
            running.pending.lock().await.remove(&id);
            bail!("transport writer is gone");
        }

        match tokio::time::timeout(Duration::from_secs(RESPONSE_TIMEOUT_SECS), rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                running.pending.lock().await.remove(&id);
                bail!("server exited before responding to {method}");
            }
            Err(_) => {
                running.pending.lock().await.remove(&id);
                bail!("no response to {method} within {RESPONSE_TIMEOUT_SECS}s");
            }
        }
    }

    async fn notify(
        &mut self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<()> {
        let running = self.running.as_ref().context("transport not started")?;
        let frame = serde_json::to_value(Notification::new(method, params))
            .context("serializing notification")?;
        running
            .outbound
            .send(frame)
            .await
            .map_err(|_| anyhow::anyhow!("transport writer is gone"))
    }

    async fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        drop(running.outbound);

        let exited = tokio::time::timeout(
            Duration::from_secs(STOP_TIMEOUT_SECS),
            running.child.wait(),
        )
        .await;
        if exited.is_err() {
            tracing::debug!("server did not exit in time, killing");
            let _ = running.child.kill().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::sync::Mutex;

    fn probe_table() -> (HandlerTable, Arc<Mutex<Vec<Option<Value>>>>) {
        let seen: Arc<Mutex<Vec<Option<Value>>>> = Arc::new(Mutex::new(Vec::new()));
        let mut table = HandlerTable::default();

        let log = Arc::clone(&seen);
        table.notifications.insert(
            "window/logMessage".to_string(),
            Box::new(move |params| log.lock().unwrap().push(params)),
        );
        table.requests.insert(
            "workspace/configuration".to_string(),
            Box::new(|_params| json!([{}, {}])),
        );

        (table, seen)
    }

    fn test_channels() -> (
        PendingMap,
        mpsc::Sender<Value>,
        mpsc::Receiver<Value>,
    ) {
        let pending: PendingMap = Arc::new(tokio::sync::Mutex::new(HashMap::new()));
        let (outbound, outbound_rx) = mpsc::channel(8);
        (pending, outbound, outbound_rx)
    }

    #[tokio::test]
    async fn response_routes_to_pending_waiter() {
        let (table, _seen) = probe_table();
        let (pending, outbound, _outbound_rx) = test_channels();

        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(1, tx);

        let frame = json!({"jsonrpc": "2.0", "id": 1, "result": {"capabilities": {}}});
        StdioTransport::dispatch(&frame, &pending, &table, &outbound).await;

        let response = rx.await.unwrap();
        assert!(response["result"]["capabilities"].is_object());
        assert!(pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn error_response_routes_to_pending_waiter() {
        let (table, _seen) = probe_table();
        let (pending, outbound, _outbound_rx) = test_channels();

        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(2, tx);

        let frame = json!({"jsonrpc": "2.0", "id": 2, "error": {"code": -32600, "message": "bad"}});
        StdioTransport::dispatch(&frame, &pending, &table, &outbound).await;

        assert!(rx.await.unwrap()["error"].is_object());
    }

    #[tokio::test]
    async fn response_for_unknown_id_is_dropped() {
        let (table, _seen) = probe_table();
        let (pending, outbound, mut outbound_rx) = test_channels();

        let frame = json!({"jsonrpc": "2.0", "id": 999, "result": {}});
        StdioTransport::dispatch(&frame, &pending, &table, &outbound).await;

        assert!(outbound_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn server_request_with_handler_gets_result_reply() {
        let (table, _seen) = probe_table();
        let (pending, outbound, mut outbound_rx) = test_channels();

        let frame = json!({
            "jsonrpc": "2.0",
            "id": 5,
            "method": "workspace/configuration",
            "params": {"items": [{}, {}]}
        });
        StdioTransport::dispatch(&frame, &pending, &table, &outbound).await;

        let reply = outbound_rx.try_recv().unwrap();
        assert_eq!(reply["id"], 5);
        assert_eq!(reply["result"], json!([{}, {}]));
        assert!(reply.get("error").is_none());
    }

    #[tokio::test]
    async fn server_request_without_handler_gets_method_not_found() {
        let (table, _seen) = probe_table();
        let (pending, outbound, mut outbound_rx) = test_channels();

        let frame = json!({"jsonrpc": "2.0", "id": 9, "method": "window/showMessageRequest"});
        StdioTransport::dispatch(&frame, &pending, &table, &outbound).await;

        let reply = outbound_rx.try_recv().unwrap();
        assert_eq!(reply["id"], 9);
        assert_eq!(reply["error"]["code"], -32601);
        let message = reply["error"]["message"].as_str().unwrap();
        assert!(message.contains("window/showMessageRequest"));
    }

    #[tokio::test]
    async fn notification_routes_to_handler() {
        let (table, seen) = probe_table();
        let (pending, outbound, _outbound_rx) = test_channels();

        let frame = json!({
            "jsonrpc": "2.0",
            "method": "window/logMessage",
            "params": {"type": 3, "message": "Indexing complete"}
        });
        StdioTransport::dispatch(&frame, &pending, &table, &outbound).await;

        let calls = seen.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].as_ref().unwrap()["message"], "Indexing complete");
    }

    #[tokio::test]
    async fn unhandled_notification_is_discarded() {
        let (table, seen) = probe_table();
        let (pending, outbound, mut outbound_rx) = test_channels();

        let frame = json!({"jsonrpc": "2.0", "method": "telemetry/event", "params": {}});
        StdioTransport::dispatch(&frame, &pending, &table, &outbound).await;

        assert!(seen.lock().unwrap().is_empty());
        assert!(outbound_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_frame_is_discarded() {
        let (table, seen) = probe_table();
        let (pending, outbound, mut outbound_rx) = test_channels();

        StdioTransport::dispatch(&json!({"jsonrpc": "2.0"}), &pending, &table, &outbound).await;

        assert!(seen.lock().unwrap().is_empty());
        assert!(outbound_rx.try_recv().is_err());
    }

    #[test]
    fn classify_frame_variants() {
        assert!(matches!(
            classify_frame(&json!({"id": 1, "result": {}})),
            Some(Incoming::Response { id: 1, .. })
        ));
        assert!(matches!(
            classify_frame(&json!({"id": 1, "method": "workspace/configuration"})),
            Some(Incoming::ServerRequest { .. })
        ));
        assert!(matches!(
            classify_frame(&json!({"method": "window/logMessage"})),
            Some(Incoming::ServerNotification { .. })
        ));
        assert!(classify_frame(&json!({"jsonrpc": "2.0"})).is_none());
        // Non-numeric response ids have no pending entry to match.
        assert!(classify_frame(&json!({"id": "abc", "result": {}})).is_none());
    }

    #[test]
    fn registration_after_start_is_dropped() {
        let mut transport = StdioTransport::new("srv", &[], Path::new("/tmp"));
        // Simulate a started transport: the handler table has been taken.
        transport.handlers = None;
        transport.on_notification("window/logMessage", Box::new(|_| {}));
        transport.on_request("workspace/configuration", Box::new(|_| Value::Null));
        assert!(transport.handlers.is_none());
    }
}
