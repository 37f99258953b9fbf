//! Client-side MCP: spawning, talking to, and tearing down upstream
//! servers running as child processes over stdio.

pub mod client;
pub mod env;
pub mod protocol;

pub use client::UpstreamClient;
pub use env::build_env;
pub use protocol::{CallToolResult, ToolContent, ToolInfo};
