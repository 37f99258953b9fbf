//! Error types for mcp-aggregator.
//!
//! Each concern gets its own focused enum rather than one catch-all type,
//! matching the taxonomy in the design (kinds, not names): `ConfigError` is
//! fatal at startup; `UpstreamError` covers the child-process lifecycle;
//! `ManagementError` is internal control flow for the five management
//! tools and is always converted to a tool-result string before crossing
//! the MCP boundary; `RecorderError` is logged and non-fatal.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading or validating the configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed as YAML.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying YAML error.
        #[source]
        source: serde_yaml::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed (duplicate names/prefixes, invalid
    /// duration strings, invalid `inherit.mode` values, and so on).
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

/// Errors raised by the upstream client during the child-process lifecycle.
///
/// These map onto the taxonomy's `SpawnError` / `HandshakeError` /
/// `TransportError` / `Timeout` kinds. They never cross the MCP boundary
/// directly — the aggregator and management-tool layers turn them into
/// tool-result text, per the propagation policy: the host-side client must
/// stay connected even when every upstream has failed.
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// The child process could not be launched, or its pipes could not be
    /// opened.
    #[error("failed to spawn upstream '{name}': {message}")]
    Spawn {
        /// Name of the upstream that failed to spawn.
        name: String,
        /// Description of the failure.
        message: String,
    },

    /// The `initialize` handshake or the initial `tools/list` call failed.
    #[error("handshake with upstream '{name}' failed: {message}")]
    Handshake {
        /// Name of the upstream.
        name: String,
        /// Description of the failure.
        message: String,
    },

    /// A framing, parse, or IO error occurred during normal operation.
    #[error("transport error on upstream '{name}': {message}")]
    Transport {
        /// Name of the upstream.
        name: String,
        /// Description of the failure.
        message: String,
    },

    /// The peer returned a JSON-RPC error response.
    #[error("upstream '{name}' returned error {code}: {message}")]
    Protocol {
        /// Name of the upstream.
        name: String,
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },

    /// The call's deadline elapsed before a response arrived.
    #[error("timed out waiting for a response from upstream '{name}'")]
    Timeout {
        /// Name of the upstream.
        name: String,
    },

    /// The client has been closed; no further calls may be issued.
    #[error("upstream '{name}' is closed")]
    Closed {
        /// Name of the upstream.
        name: String,
    },
}

impl UpstreamError {
    /// Returns whether this error indicates the underlying connection is
    /// dead and the upstream should be marked disconnected.
    ///
    /// Matches the classification rule in the aggregator's handler
    /// contract: connection-failure text ("connection", "broken pipe",
    /// "eof", "closed", "timeout", case-insensitive substring) flips the
    /// upstream to disconnected.
    #[must_use]
    pub fn is_connection_failure(&self) -> bool {
        const MARKERS: [&str; 5] = ["connection", "broken pipe", "eof", "closed", "timeout"];
        let text = self.to_string().to_lowercase();
        MARKERS.iter().any(|marker| text.contains(marker))
    }
}

/// Errors raised by the management-tool layer's internal control flow.
///
/// Always converted into a tool-result error string before being returned
/// to the host-side client (see [`crate::management`]).
#[derive(Error, Debug)]
pub enum ManagementError {
    /// No upstream is registered under the given name.
    #[error("server '{name}' not found")]
    NotFound {
        /// The unknown upstream name.
        name: String,
    },

    /// An upstream with this name is already registered.
    #[error("server '{name}' already exists")]
    AlreadyExists {
        /// The colliding upstream name.
        name: String,
    },

    /// The upstream must be disconnected before this operation is valid.
    #[error("server '{name}' is still connected; disconnect it first")]
    StillConnected {
        /// The upstream name.
        name: String,
    },

    /// The command string could not be parsed into an argv.
    #[error("invalid command: {message}")]
    InvalidCommand {
        /// Description of the parse failure.
        message: String,
    },

    /// Spawning or initializing the upstream failed.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// Errors raised while writing to the recording file.
///
/// Logged and non-fatal: a failure to write a record does not disable
/// recording and does not affect the tool call that triggered it.
#[derive(Error, Debug)]
pub enum RecorderError {
    /// I/O failure opening or writing the recording file.
    #[error("recorder I/O error: {message}")]
    Io {
        /// Description of the failure.
        message: String,
    },

    /// The message could not be serialized to JSON.
    #[error("recorder serialization error: {message}")]
    Serialize {
        /// Description of the failure.
        message: String,
    },
}
