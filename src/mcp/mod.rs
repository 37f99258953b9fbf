//! Host-side Model Context Protocol server implementation.
//!
//! This module implements the MCP specification for exposing management
//! tools and aggregated upstream tools to the host-side client. The server
//! communicates over stdio transport using JSON-RPC 2.0 messages.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      MCP Server Adapter                      │
//! │                                                               │
//! │   ┌─────────────┐    ┌─────────────┐    ┌─────────────┐    │
//! │   │  Transport  │───▶│   Server    │───▶│  Aggregator │    │
//! │   │   (stdio)   │    │  (lifecycle)│    │ (dispatch)  │    │
//! │   └─────────────┘    └─────────────┘    └─────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! This implementation targets MCP protocol version 2024-11-05.

pub mod protocol;
pub mod server;
pub mod transport;

pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
pub use server::McpServerAdapter;
pub use transport::StdioTransport;
