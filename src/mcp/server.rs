//! MCP server implementation.
//!
//! This module implements the host-side MCP server lifecycle:
//!
//! 1. **Initialisation**: capability negotiation and version agreement.
//! 2. **Operation**: `tools/list` merges the five management tools with
//!    every tool currently advertised by a registered upstream;
//!    `tools/call` dispatches to whichever of the two owns the name.
//! 3. **Shutdown**: graceful connection termination on EOF.
//!
//! # Lifecycle Flow
//!
//! ```text
//! Client                     Server
//!   │                          │
//!   ├─── initialize ──────────▶│
//!   │◀── initialize result ────┤
//!   ├─── initialized ─────────▶│
//!   │    (notification)        │
//!   │      [Operation Phase]   │
//!   ├─── tools/list ──────────▶│
//!   │◀── tools list ───────────┤
//!   ├─── tools/call ──────────▶│
//!   │◀── call result ──────────┤
//!   │      [Shutdown]          │
//!   ├─── (close stdin) ───────▶│
//!   │                          │ exit
//! ```

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::management::{management_tool_descriptors, ManagementTools};
use crate::mcp::protocol::{
    ErrorCode, IncomingMessage, JsonRpcError, JsonRpcErrorData, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, RequestId, MCP_PROTOCOL_VERSION, SERVER_NAME,
};
use crate::mcp::transport::StdioTransport;
use crate::recorder::RecorderSession;
use crate::registry::Aggregator;

const MANAGEMENT_TOOLS: [&str; 5] = [
    "server_add",
    "server_remove",
    "server_disconnect",
    "server_reconnect",
    "server_list",
];

/// Server state in the MCP lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Waiting for initialize request.
    AwaitingInit,
    /// Initialize received, waiting for initialized notification.
    Initialising,
    /// Ready for normal operation.
    Running,
    /// Shutdown in progress.
    ShuttingDown,
}

/// Server capabilities advertised during initialisation.
#[derive(Debug, Clone, Serialize)]
pub struct ServerCapabilities {
    /// Tool-related capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolCapabilities>,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            tools: Some(ToolCapabilities::default()),
        }
    }
}

/// Tool-specific capabilities.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolCapabilities {
    /// Whether the tool list can change during the session (it can: tools
    /// appear and disappear as upstreams connect, reconnect, and are
    /// removed).
    #[serde(rename = "listChanged", skip_serializing_if = "std::ops::Not::not")]
    pub list_changed: bool,
}

/// Server information for initialisation response.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Client information received during initialisation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    #[serde(default)]
    pub version: Option<String>,
}

/// Parameters for the initialize request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by client.
    pub protocol_version: String,
    /// Client capabilities.
    #[serde(default)]
    pub capabilities: Value,
    /// Client information.
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

/// A tool definition for the `tools/list` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Unique tool name (prefixed, for upstream tools).
    pub name: String,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool's input parameters.
    pub input_schema: Value,
}

/// Parameters for tools/call request.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    /// Name of the tool to call.
    pub name: String,
    /// Arguments for the tool.
    #[serde(default)]
    pub arguments: Value,
}

/// Content item in a tool call response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
}

/// Result of a tool call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Content returned by the tool.
    pub content: Vec<ToolContent>,
    /// Whether the tool call resulted in an error.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolCallResult {
    /// Creates a successful text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Creates an error text result.
    ///
    /// Per the MCP spec, tool errors are reported in the result, not as a
    /// JSON-RPC protocol error — the host-side client must stay connected
    /// even when every upstream has failed.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    /// Appends one more text content item. Used to inject the recorder's
    /// banner into a successful response without altering `is_error` or
    /// any existing content.
    fn with_extra_text(mut self, text: String) -> Self {
        self.content.push(ToolContent::Text { text });
        self
    }
}

/// The host-side MCP server: owns the stdio transport and the lifecycle
/// state machine, and delegates everything tool-related to the
/// [`Aggregator`] and [`ManagementTools`].
pub struct McpServerAdapter {
    state: ServerState,
    transport: StdioTransport,
    protocol_version: Option<String>,
    aggregator: Arc<Aggregator>,
    management: Arc<ManagementTools>,
    recorder: Option<Arc<RecorderSession>>,
}

impl McpServerAdapter {
    /// Creates a new adapter bound to the given aggregator, management
    /// tools, and optional recorder.
    #[must_use]
    pub fn new(
        aggregator: Arc<Aggregator>,
        management: Arc<ManagementTools>,
        recorder: Option<Arc<RecorderSession>>,
    ) -> Self {
        Self {
            state: ServerState::AwaitingInit,
            transport: StdioTransport::new(),
            protocol_version: None,
            aggregator,
            management,
            recorder,
        }
    }

    /// Returns the current server state.
    #[must_use]
    pub const fn state(&self) -> ServerState {
        self.state
    }

    /// Runs the MCP server main loop.
    ///
    /// This method blocks until the client closes the connection or an
    /// unrecoverable error occurs.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn run(&mut self) -> std::io::Result<()> {
        loop {
            let Some(line) = self.transport.read_line().await? else {
                self.state = ServerState::ShuttingDown;
                break;
            };

            if line.trim().is_empty() {
                continue;
            }

            self.handle_line(&line).await?;

            if self.state == ServerState::ShuttingDown {
                break;
            }
        }

        Ok(())
    }

    async fn handle_line(&mut self, line: &str) -> std::io::Result<()> {
        use crate::mcp::protocol::parse_message;

        match parse_message(line) {
            Ok(msg) => self.handle_message(msg).await,
            Err(error) => self.transport.write_error(&error).await,
        }
    }

    async fn handle_message(&mut self, msg: IncomingMessage) -> std::io::Result<()> {
        match msg {
            IncomingMessage::Request(req) => self.handle_request(req).await,
            IncomingMessage::Notification(ref notif) => {
                self.handle_notification(notif);
                Ok(())
            }
        }
    }

    async fn handle_request(&mut self, req: JsonRpcRequest) -> std::io::Result<()> {
        let response = match req.method.as_str() {
            "initialize" => self.handle_initialize(&req),
            "tools/list" => self.handle_tools_list(&req).await,
            "tools/call" => self.handle_tools_call(&req).await,
            "ping" => Ok(Self::handle_ping(&req)),
            _ => Err(JsonRpcError::method_not_found(req.id.clone(), &req.method)),
        };

        match response {
            Ok(resp) => self.transport.write_response(&resp).await,
            Err(error) => self.transport.write_error(&error).await,
        }
    }

    fn handle_notification(&mut self, notif: &JsonRpcNotification) {
        if notif.method == "notifications/initialized" && self.state == ServerState::Initialising
        {
            self.state = ServerState::Running;
        }
        // All other notifications (including unknown ones) are ignored per the JSON-RPC spec.
    }

    fn handle_initialize(&mut self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        if self.state != ServerState::AwaitingInit {
            return Err(JsonRpcError::new(
                Some(req.id.clone()),
                JsonRpcErrorData::with_message(
                    ErrorCode::InvalidRequest,
                    "Server already initialised",
                ),
            ));
        }

        let _params: InitializeParams = req
            .params
            .as_ref()
            .map(|p| serde_json::from_value(p.clone()))
            .transpose()
            .map_err(|e| {
                JsonRpcError::invalid_params(req.id.clone(), format!("Invalid initialize params: {e}"))
            })?
            .ok_or_else(|| JsonRpcError::invalid_params(req.id.clone(), "Missing initialize params"))?;

        let negotiated_version = MCP_PROTOCOL_VERSION.to_string();
        self.protocol_version = Some(negotiated_version.clone());
        self.state = ServerState::Initialising;

        let result = json!({
            "protocolVersion": negotiated_version,
            "capabilities": ServerCapabilities::default(),
            "serverInfo": ServerInfo::default(),
        });

        Ok(JsonRpcResponse::success(req.id.clone(), result))
    }

    async fn handle_tools_list(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        self.require_running(&req.id)?;

        let mut tools: Vec<ToolDefinition> = management_tool_descriptors()
            .into_iter()
            .map(|info| ToolDefinition {
                name: info.name,
                description: info.description,
                input_schema: info.input_schema.unwrap_or_else(|| json!({"type": "object"})),
            })
            .collect();

        tools.extend(self.aggregator.list_tools().await.into_iter().map(|info| ToolDefinition {
            name: info.name,
            description: info.description,
            input_schema: info.input_schema.unwrap_or_else(|| json!({"type": "object"})),
        }));

        Ok(JsonRpcResponse::success(req.id.clone(), json!({ "tools": tools })))
    }

    async fn handle_tools_call(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        self.require_running(&req.id)?;

        let params: ToolCallParams = req
            .params
            .as_ref()
            .map(|p| serde_json::from_value(p.clone()))
            .transpose()
            .map_err(|e| JsonRpcError::invalid_params(req.id.clone(), format!("Invalid tool call params: {e}")))?
            .ok_or_else(|| JsonRpcError::invalid_params(req.id.clone(), "Missing tool call params"))?;

        if let Some(recorder) = &self.recorder {
            let request_payload = json!({"name": params.name, "arguments": params.arguments});
            if let Err(error) = recorder.record_request(&params.name, Self::server_name_for(&params.name), &request_payload) {
                tracing::warn!(%error, "failed to record tool_call request");
            }
        }

        let start = Instant::now();
        let mut result = if MANAGEMENT_TOOLS.contains(&params.name.as_str()) {
            self.dispatch_management(&params.name, params.arguments.clone()).await
        } else {
            let outcome = self.aggregator.dispatch_tool_call(&params.name, params.arguments.clone()).await;
            if outcome.is_error {
                ToolCallResult::error(outcome.text)
            } else {
                ToolCallResult::text(outcome.text)
            }
        };
        let elapsed = start.elapsed();

        if let Some(recorder) = &self.recorder {
            let response_payload = serde_json::to_value(&result).unwrap_or(Value::Null);
            if let Err(error) = recorder.record_response(&params.name, Self::server_name_for(&params.name), &response_payload) {
                tracing::warn!(%error, "failed to record tool_call response");
            }

            if !result.is_error {
                tracing::trace!(elapsed_ms = elapsed.as_millis(), "recorded successful tool call");
                result = result.with_extra_text(recorder.banner());
            }
        }

        Ok(JsonRpcResponse::success(
            req.id.clone(),
            serde_json::to_value(result).unwrap_or(Value::Null),
        ))
    }

    async fn dispatch_management(&self, name: &str, arguments: Value) -> ToolCallResult {
        let outcome = match name {
            "server_add" => self.management.server_add(arguments).await,
            "server_remove" => self.management.server_remove(arguments).await,
            "server_disconnect" => self.management.server_disconnect(arguments).await,
            "server_reconnect" => self.management.server_reconnect(arguments).await,
            "server_list" => self.management.server_list(arguments).await,
            _ => unreachable!("dispatch_management only called for MANAGEMENT_TOOLS"),
        };

        if outcome.is_error {
            ToolCallResult::error(outcome.text)
        } else {
            ToolCallResult::text(outcome.text)
        }
    }

    /// The upstream name used for the recorder's `server_name` field: the
    /// prefix up to the first `_`, or the literal tool name itself for
    /// management tools, which have no owning upstream.
    fn server_name_for(tool_name: &str) -> &str {
        if MANAGEMENT_TOOLS.contains(&tool_name) {
            "mcp-aggregator"
        } else {
            tool_name.split('_').next().unwrap_or(tool_name)
        }
    }

    fn handle_ping(req: &JsonRpcRequest) -> JsonRpcResponse {
        JsonRpcResponse::success(req.id.clone(), json!({}))
    }

    fn require_running(&self, id: &RequestId) -> Result<(), JsonRpcError> {
        if self.state != ServerState::Running {
            return Err(JsonRpcError::new(
                Some(id.clone()),
                JsonRpcErrorData::with_message(ErrorCode::InvalidRequest, "Server not initialised"),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InheritPolicy;
    use std::collections::HashMap;

    fn adapter() -> McpServerAdapter {
        let aggregator = Arc::new(Aggregator::new());
        let management = Arc::new(ManagementTools::new(
            Arc::clone(&aggregator),
            InheritPolicy::default(),
            HashMap::new(),
        ));
        McpServerAdapter::new(aggregator, management, None)
    }

    #[test]
    fn server_initial_state() {
        assert_eq!(adapter().state(), ServerState::AwaitingInit);
    }

    #[test]
    fn tool_call_result_text() {
        let result = ToolCallResult::text("Hello, world!");
        assert!(!result.is_error);
        assert_eq!(result.content.len(), 1);
        match &result.content[0] {
            ToolContent::Text { text } => assert_eq!(text, "Hello, world!"),
        }
    }

    #[test]
    fn tool_call_result_error() {
        let result = ToolCallResult::error("Something went wrong");
        assert!(result.is_error);
        match &result.content[0] {
            ToolContent::Text { text } => assert_eq!(text, "Something went wrong"),
        }
    }

    #[test]
    fn with_extra_text_appends_without_changing_is_error() {
        let result = ToolCallResult::text("ok").with_extra_text("[recorded]".to_string());
        assert!(!result.is_error);
        assert_eq!(result.content.len(), 2);
    }

    #[test]
    fn server_capabilities_serialisation() {
        let caps = ServerCapabilities::default();
        let json = serde_json::to_value(&caps).unwrap();
        assert!(json.get("tools").is_some());
    }

    #[test]
    fn server_info_default() {
        let info = ServerInfo::default();
        assert_eq!(info.name, SERVER_NAME);
        assert!(!info.version.is_empty());
    }

    #[test]
    fn server_name_for_splits_on_first_underscore() {
        assert_eq!(McpServerAdapter::server_name_for("echo_ping"), "echo");
        assert_eq!(McpServerAdapter::server_name_for("server_list"), "mcp-aggregator");
    }

    #[tokio::test]
    async fn tools_list_before_initialize_is_rejected() {
        let adapter = adapter();
        let req = JsonRpcRequest {
            _jsonrpc: None,
            id: RequestId::Number(1),
            method: "tools/list".to_string(),
            params: None,
        };
        let err = adapter.handle_tools_list(&req).await.unwrap_err();
        assert!(serde_json::to_string(&err).unwrap().contains("not initialised"));
    }

    #[tokio::test]
    async fn tools_list_after_running_includes_management_tools() {
        let mut adapter = adapter();
        adapter.state = ServerState::Running;
        let req = JsonRpcRequest {
            _jsonrpc: None,
            id: RequestId::Number(1),
            method: "tools/list".to_string(),
            params: None,
        };
        let resp = adapter.handle_tools_list(&req).await.unwrap();
        let json = serde_json::to_value(&resp).unwrap();
        let names: Vec<String> = json["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect();
        assert!(names.contains(&"server_list".to_string()));
        assert!(names.contains(&"server_add".to_string()));
    }

    #[tokio::test]
    async fn tools_call_on_unregistered_upstream_tool_reports_tool_error() {
        let mut adapter = adapter();
        adapter.state = ServerState::Running;
        let req = JsonRpcRequest {
            _jsonrpc: None,
            id: RequestId::Number(1),
            method: "tools/call".to_string(),
            params: Some(json!({"name": "echo_ping", "arguments": {}})),
        };
        let resp = adapter.handle_tools_call(&req).await.unwrap();
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["result"]["isError"], true);
    }
}
