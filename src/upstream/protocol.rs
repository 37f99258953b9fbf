//! MCP wire types for the client role: requests this proxy sends to an
//! upstream child process, and responses it receives back.
//!
//! Separate from [`crate::mcp::protocol`], which implements the *server*
//! role towards the host. The two sides share a wire format (JSON-RPC 2.0,
//! newline-delimited) but not a Rust type: the proxy is a server to its
//! host and a client to its upstreams at the same time.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An outgoing JSON-RPC request, always carrying a numeric id assigned by
/// the client's monotonic counter.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    #[must_use]
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// An outgoing JSON-RPC notification (no id, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }
}

/// An incoming JSON-RPC error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    #[allow(dead_code)]
    pub data: Option<Value>,
}

/// An incoming JSON-RPC response, matched to its request by `id`.
///
/// `id` is optional to tolerate a malformed peer that replies with no id
/// at all; such a response can never be matched to a pending call and is
/// dropped by the reader task.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    #[allow(dead_code)]
    pub jsonrpc: Option<String>,
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// This client's self-identification sent in `initialize`.
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Capability set advertised by this client. Empty: the proxy declares no
/// optional capabilities of its own (sampling, roots) towards upstreams.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientCapabilities {}

/// Parameters for the `initialize` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    pub client_info: ClientInfo,
}

/// One tool descriptor as returned by `tools/list`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Option<Value>,
}

/// The `result` payload of a `tools/list` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<ToolInfo>,
}

/// Parameters for a `tools/call` request.
#[derive(Debug, Clone, Serialize)]
pub struct CallToolParams {
    pub name: String,
    pub arguments: Value,
}

/// One element of a `tools/call` result's `content` array.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    /// Plain text content.
    Text { text: String },
    /// Image content, referenced by MIME type and base64 data.
    Image {
        #[serde(default)]
        data: Option<String>,
        #[serde(default, rename = "mimeType")]
        mime_type: Option<String>,
    },
    /// An embedded resource reference.
    Resource {
        #[serde(default)]
        resource: Option<Value>,
    },
}

impl ToolContent {
    /// Renders this content element as text for flattening into a single
    /// result string (the aggregator's handler contract, step 7).
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::Image { .. } => "[image content omitted]".to_string(),
            Self::Resource { resource } => resource
                .as_ref()
                .and_then(|r| r.get("uri"))
                .and_then(Value::as_str)
                .map_or_else(|| "[resource content omitted]".to_string(), ToString::to_string),
        }
    }
}

/// The `result` payload of a `tools/call` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl CallToolResult {
    /// Whether the upstream reported this call as failed.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.is_error
    }

    /// Flattens `content` into a single string, one element per line.
    #[must_use]
    pub fn flatten_text(&self) -> String {
        self.content
            .iter()
            .map(ToolContent::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_with_string_id_omitted_when_none() {
        let req = JsonRpcRequest::new(1, "tools/list", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"id\":1"));
        assert!(!json.contains("params"));
    }

    #[test]
    fn tool_content_flattens_text_elements() {
        let result = CallToolResult {
            content: vec![
                ToolContent::Text { text: "first".to_string() },
                ToolContent::Text { text: "second".to_string() },
            ],
            is_error: false,
        };
        assert_eq!(result.flatten_text(), "first\nsecond");
        assert!(!result.is_error());
    }

    #[test]
    fn response_parses_protocol_error() {
        let line = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"method not found"}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(line).unwrap();
        assert_eq!(resp.id, Some(1));
        assert_eq!(resp.error.unwrap().code, -32601);
    }
}
