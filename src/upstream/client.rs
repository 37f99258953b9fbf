//! Async client for one upstream MCP server running as a child process.
//!
//! One [`UpstreamClient`] owns one child process over its whole lifecycle
//! (spawn, handshake, calls, close). Every public operation first checks
//! `connected` under the client's state mutex as a single critical
//! section, then proceeds without holding the lock across the round trip —
//! concurrent calls interleave freely, correlated by request id.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::error::UpstreamError;
use crate::upstream::protocol::{
    CallToolParams, CallToolResult, ClientCapabilities, ClientInfo, InitializeParams,
    JsonRpcRequest, JsonRpcResponse, ListToolsResult, ToolInfo,
};

const CLIENT_NAME: &str = "mcp-aggregator";
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");
const MCP_PROTOCOL_VERSION: &str = crate::mcp::protocol::MCP_PROTOCOL_VERSION;
const CLOSE_GRACE_PERIOD: Duration = Duration::from_millis(500);

type PendingMap = Arc<StdMutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

struct ConnectionState {
    connected: bool,
    child: Option<Child>,
    writer_tx: Option<mpsc::UnboundedSender<String>>,
    reader_handle: Option<JoinHandle<()>>,
    writer_handle: Option<JoinHandle<()>>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            connected: false,
            child: None,
            writer_tx: None,
            reader_handle: None,
            writer_handle: None,
        }
    }
}

/// A connected (or not-yet/no-longer-connected) handle to one upstream
/// child process.
pub struct UpstreamClient {
    name: String,
    timeout: Duration,
    state: Arc<AsyncMutex<ConnectionState>>,
    pending: PendingMap,
    next_id: AtomicU64,
}

impl UpstreamClient {
    /// Creates a disconnected client for the named upstream.
    #[must_use]
    pub fn new(name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            timeout,
            state: Arc::new(AsyncMutex::new(ConnectionState::default())),
            pending: Arc::new(StdMutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// The upstream's logical name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the client currently believes the child is alive.
    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }

    /// Spawns the child process with the given argv and environment.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Spawn`] if the process cannot be launched
    /// or its stdio pipes cannot be opened.
    pub async fn connect(
        &self,
        command: &str,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<(), UpstreamError> {
        let mut cmd = Command::new(command);
        cmd.args(args);
        cmd.env_clear();
        for (key, value) in env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| UpstreamError::Spawn {
            name: self.name.clone(),
            message: e.to_string(),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| UpstreamError::Spawn {
            name: self.name.clone(),
            message: "child did not expose a stdin pipe".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| UpstreamError::Spawn {
            name: self.name.clone(),
            message: "child did not expose a stdout pipe".to_string(),
        })?;

        let (writer_tx, writer_rx) = mpsc::unbounded_channel::<String>();
        let writer_handle = tokio::spawn(Self::writer_loop(stdin, writer_rx));

        let pending = Arc::clone(&self.pending);
        let reader_state = Arc::clone(&self.state);
        let reader_handle = tokio::spawn(Self::reader_loop(
            stdout,
            pending,
            reader_state,
            self.name.clone(),
        ));

        let mut state = self.state.lock().await;
        state.connected = true;
        state.child = Some(child);
        state.writer_tx = Some(writer_tx);
        state.reader_handle = Some(reader_handle);
        state.writer_handle = Some(writer_handle);

        Ok(())
    }

    async fn writer_loop(
        mut stdin: tokio::process::ChildStdin,
        mut rx: mpsc::UnboundedReceiver<String>,
    ) {
        while let Some(line) = rx.recv().await {
            if stdin.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdin.write_all(b"\n").await.is_err() {
                break;
            }
            if stdin.flush().await.is_err() {
                break;
            }
        }
    }

    async fn reader_loop(
        stdout: tokio::process::ChildStdout,
        pending: PendingMap,
        state: Arc<AsyncMutex<ConnectionState>>,
        name: String,
    ) {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let Ok(response) = serde_json::from_str::<JsonRpcResponse>(&line) else {
                        tracing::debug!(upstream = %name, "ignoring unparseable line from upstream");
                        continue;
                    };
                    let Some(id) = response.id else {
                        continue;
                    };
                    let sender = pending.lock().unwrap().remove(&id);
                    if let Some(sender) = sender {
                        let _ = sender.send(response);
                    }
                }
                Ok(None) => {
                    tracing::debug!(upstream = %name, "upstream closed its stdout (EOF)");
                    break;
                }
                Err(error) => {
                    tracing::debug!(upstream = %name, %error, "error reading from upstream");
                    break;
                }
            }
        }
        pending.lock().unwrap().clear();
        state.lock().await.connected = false;
    }

    async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value, UpstreamError> {
        let writer_tx = {
            let state = self.state.lock().await;
            if !state.connected {
                return Err(UpstreamError::Closed {
                    name: self.name.clone(),
                });
            }
            state
                .writer_tx
                .clone()
                .expect("connected state always has a writer handle")
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (resp_tx, resp_rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, resp_tx);

        let request = JsonRpcRequest::new(id, method, params);
        let line = serde_json::to_string(&request).map_err(|e| UpstreamError::Transport {
            name: self.name.clone(),
            message: format!("failed to serialize request: {e}"),
        })?;

        if writer_tx.send(line).is_err() {
            self.pending.lock().unwrap().remove(&id);
            return Err(UpstreamError::Transport {
                name: self.name.clone(),
                message: "writer task has exited".to_string(),
            });
        }

        let response = match tokio::time::timeout(self.timeout, resp_rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(UpstreamError::Transport {
                    name: self.name.clone(),
                    message: "connection closed before a response arrived".to_string(),
                });
            }
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                return Err(UpstreamError::Timeout {
                    name: self.name.clone(),
                });
            }
        };

        if let Some(error) = response.error {
            return Err(UpstreamError::Protocol {
                name: self.name.clone(),
                code: error.code,
                message: error.message,
            });
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<(), UpstreamError> {
        let writer_tx = {
            let state = self.state.lock().await;
            if !state.connected {
                return Err(UpstreamError::Closed {
                    name: self.name.clone(),
                });
            }
            state
                .writer_tx
                .clone()
                .expect("connected state always has a writer handle")
        };

        let notification = crate::upstream::protocol::JsonRpcNotification::new(method, params);
        let line = serde_json::to_string(&notification).map_err(|e| UpstreamError::Transport {
            name: self.name.clone(),
            message: format!("failed to serialize notification: {e}"),
        })?;

        writer_tx.send(line).map_err(|_| UpstreamError::Transport {
            name: self.name.clone(),
            message: "writer task has exited".to_string(),
        })
    }

    /// Performs the `initialize` handshake and sends the
    /// `notifications/initialized` follow-up.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Handshake`] wrapping whatever
    /// [`send_request`](Self::send_request) returned on failure.
    pub async fn initialize(&self) -> Result<(), UpstreamError> {
        let params = InitializeParams {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: CLIENT_NAME.to_string(),
                version: CLIENT_VERSION.to_string(),
            },
        };
        let params_value = serde_json::to_value(&params).map_err(|e| UpstreamError::Handshake {
            name: self.name.clone(),
            message: e.to_string(),
        })?;

        self.send_request("initialize", Some(params_value))
            .await
            .map_err(|e| UpstreamError::Handshake {
                name: self.name.clone(),
                message: e.to_string(),
            })?;

        self.send_notification("notifications/initialized", None)
            .await
            .map_err(|e| UpstreamError::Handshake {
                name: self.name.clone(),
                message: e.to_string(),
            })?;

        Ok(())
    }

    /// Lists the upstream's tools.
    ///
    /// # Errors
    ///
    /// Returns an [`UpstreamError`] if the call fails or the response
    /// cannot be parsed as a tool list.
    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>, UpstreamError> {
        let result = self.send_request("tools/list", None).await?;
        let parsed: ListToolsResult =
            serde_json::from_value(result).map_err(|e| UpstreamError::Protocol {
                name: self.name.clone(),
                code: 0,
                message: format!("malformed tools/list result: {e}"),
            })?;
        Ok(parsed.tools)
    }

    /// Calls one of the upstream's tools by its original (unprefixed)
    /// name.
    ///
    /// # Errors
    ///
    /// Returns an [`UpstreamError`] if the call fails or the response
    /// cannot be parsed as a tool-call result.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<CallToolResult, UpstreamError> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        let params_value = serde_json::to_value(&params).map_err(|e| UpstreamError::Transport {
            name: self.name.clone(),
            message: e.to_string(),
        })?;

        let result = self.send_request("tools/call", Some(params_value)).await?;
        serde_json::from_value(result).map_err(|e| UpstreamError::Protocol {
            name: self.name.clone(),
            code: 0,
            message: format!("malformed tools/call result: {e}"),
        })
    }

    /// Closes the connection: stops accepting new calls, closes the
    /// child's stdin (signaling EOF), waits briefly for graceful exit,
    /// then kills the child if it hasn't exited. Idempotent.
    pub async fn close(&self) {
        let (writer_tx, child, reader_handle, writer_handle) = {
            let mut state = self.state.lock().await;
            if !state.connected {
                return;
            }
            state.connected = false;
            (
                state.writer_tx.take(),
                state.child.take(),
                state.reader_handle.take(),
                state.writer_handle.take(),
            )
        };

        drop(writer_tx);

        if let Some(mut child) = child {
            match tokio::time::timeout(CLOSE_GRACE_PERIOD, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                }
            }
        }

        if let Some(handle) = writer_handle {
            handle.abort();
        }
        if let Some(handle) = reader_handle {
            handle.abort();
        }

        self.pending.lock().unwrap().clear();
    }
}
