//! JSON-RPC 2.0 and MCP wire types for the host-side transport.
//!
//! The host-side transport is consumed "from a conforming library" per the
//! design notes, but no such library exists in this workspace's dependency
//! set, so the thin JSON-RPC envelope is implemented directly here in the
//! same spirit as the upstream-facing wire types in
//! [`crate::upstream::protocol`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MCP protocol version advertised by this server.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Name advertised in `serverInfo`.
pub const SERVER_NAME: &str = "mcp-aggregator";

/// A JSON-RPC request id, which may be a string, a number, or absent.
///
/// Kept as a thin wrapper over [`Value`] rather than restricted to one
/// representation because JSON-RPC permits either.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id.
    Number(i64),
    /// String id.
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// An incoming JSON-RPC request.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    /// Must be `"2.0"`; not checked strictly (clients are varied).
    #[serde(default, rename = "jsonrpc")]
    pub _jsonrpc: Option<String>,
    /// Request id, echoed back in the response.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Method parameters, if any.
    #[serde(default)]
    pub params: Option<Value>,
}

/// An incoming JSON-RPC notification (no `id`, no response expected).
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcNotification {
    /// Method name.
    pub method: String,
    /// Method parameters, if any.
    #[serde(default)]
    pub params: Option<Value>,
}

/// A parsed incoming JSON-RPC message: either a request or a notification.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    /// A request expecting a response.
    Request(JsonRpcRequest),
    /// A notification; no response is sent.
    Notification(JsonRpcNotification),
}

/// A successful or error JSON-RPC response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    jsonrpc: &'static str,
    id: RequestId,
    result: Value,
}

impl JsonRpcResponse {
    /// Builds a successful response.
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result,
        }
    }
}

/// Standard JSON-RPC 2.0 error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid JSON was received.
    ParseError,
    /// The JSON sent is not a valid request object.
    InvalidRequest,
    /// The requested method does not exist.
    MethodNotFound,
    /// Invalid method parameters.
    InvalidParams,
    /// Internal JSON-RPC error.
    InternalError,
}

impl ErrorCode {
    const fn code(self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
        }
    }
}

/// The `error` payload of a JSON-RPC error response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcErrorData {
    code: i64,
    message: String,
}

impl JsonRpcErrorData {
    /// Builds an error payload with the given code and message.
    #[must_use]
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
        }
    }
}

/// A JSON-RPC error response (or a parse failure with no known id).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    jsonrpc: &'static str,
    id: Option<RequestId>,
    error: JsonRpcErrorData,
}

impl JsonRpcError {
    /// Builds an error response for the given id (or `None` if the
    /// original request's id could not be determined).
    #[must_use]
    pub fn new(id: Option<RequestId>, error: JsonRpcErrorData) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            error,
        }
    }

    /// Convenience constructor for a "method not found" error.
    #[must_use]
    pub fn method_not_found(id: RequestId, method: &str) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(
                ErrorCode::MethodNotFound,
                format!("method not found: {method}"),
            ),
        )
    }

    /// Convenience constructor for an "invalid params" error.
    #[must_use]
    pub fn invalid_params(id: RequestId, message: impl Into<String>) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(ErrorCode::InvalidParams, message.into()),
        )
    }

    /// Convenience constructor for a parse error with no resolvable id.
    #[must_use]
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(
            None,
            JsonRpcErrorData::with_message(ErrorCode::ParseError, message.into()),
        )
    }
}

/// Parses one line of input into a request or notification.
///
/// # Errors
///
/// Returns a [`JsonRpcError`] if the line is not valid JSON, is not an
/// object, or is missing a `method` field.
pub fn parse_message(line: &str) -> Result<IncomingMessage, JsonRpcError> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| JsonRpcError::parse_error(format!("invalid JSON: {e}")))?;

    if value.get("id").is_some() {
        let request: JsonRpcRequest = serde_json::from_value(value)
            .map_err(|e| JsonRpcError::parse_error(format!("invalid request: {e}")))?;
        Ok(IncomingMessage::Request(request))
    } else {
        let notification: JsonRpcNotification = serde_json::from_value(value)
            .map_err(|e| JsonRpcError::parse_error(format!("invalid notification: {e}")))?;
        Ok(IncomingMessage::Notification(notification))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_with_numeric_id() {
        let line = r#"{"jsonrpc":"2.0","id":1,"method":"ping","params":{}}"#;
        match parse_message(line).unwrap() {
            IncomingMessage::Request(req) => {
                assert_eq!(req.id, RequestId::Number(1));
                assert_eq!(req.method, "ping");
            }
            IncomingMessage::Notification(_) => panic!("expected a request"),
        }
    }

    #[test]
    fn parses_notification_with_no_id() {
        let line = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        match parse_message(line).unwrap() {
            IncomingMessage::Notification(n) => {
                assert_eq!(n.method, "notifications/initialized");
            }
            IncomingMessage::Request(_) => panic!("expected a notification"),
        }
    }

    #[test]
    fn rejects_malformed_json() {
        let err = parse_message("not json").unwrap_err();
        assert!(serde_json::to_string(&err).unwrap().contains("-32700"));
    }

    #[test]
    fn request_id_displays_numbers_and_strings() {
        assert_eq!(RequestId::Number(42).to_string(), "42");
        assert_eq!(RequestId::String("abc".to_string()).to_string(), "abc");
    }
}
