//! mcp-aggregator: an aggregating proxy for the Model Context Protocol.
//!
//! The proxy exposes a single MCP endpoint to one host-side client while
//! fanning out tool calls to a dynamic set of upstream MCP servers running
//! as long-lived child processes over stdio. It supports live lifecycle
//! management of upstreams through in-band management tools, hot-swap of a
//! child process while preserving its logical tool identity, optional
//! recording of every JSON-RPC message, and tier-based environment
//! scrubbing when launching children.
//!
//! # Modules
//!
//! - [`config`] — configuration loading and validation
//! - [`error`] — error types
//! - [`mcp`] — host-side MCP protocol implementation (transport, server)
//! - [`upstream`] — upstream client: stdio JSON-RPC, correlation, lifecycle
//! - [`registry`] — tool registry and aggregator
//! - [`management`] — the five reflective management tools
//! - [`recorder`] — JSONL recording of request/response traffic

pub mod config;
pub mod error;
pub mod management;
pub mod mcp;
pub mod recorder;
pub mod registry;
pub mod upstream;
