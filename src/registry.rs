//! The aggregator: a name-keyed table of upstream connections and the
//! dispatch logic that routes a namespaced tool call to the right one.
//!
//! The table is keyed by upstream *name*, and every dispatch re-resolves
//! the current client from the table rather than holding one captured at
//! registration time. This is what lets `server_reconnect` hot-swap a
//! client underneath in-flight or future calls without anyone having to
//! know it happened.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, RwLock};

use crate::config::UpstreamSpec;
use crate::error::ManagementError;
use crate::upstream::{ToolInfo, UpstreamClient};

/// One registered upstream: its launch recipe, its live client handle, and
/// the tool list cached from its last successful `tools/list` call.
pub struct UpstreamEntry {
    /// The spec this upstream was launched with (kept for `server_reconnect`
    /// and for `server_list`'s rendering).
    pub spec: UpstreamSpec,
    /// The live (or dead-but-not-yet-removed) client handle.
    pub client: Arc<UpstreamClient>,
    /// Tools last seen from this upstream, namespaced display deferred to
    /// [`Aggregator::list_tools`].
    pub tools: AsyncMutex<Vec<ToolInfo>>,
    /// Whether this upstream came from the initial configuration (`true`)
    /// or was added at runtime via `server_add`/`server_reconnect`
    /// (`false`). Used only to section `server_list`'s rendering.
    pub is_static: bool,
}

impl UpstreamEntry {
    /// Builds a fresh, not-yet-connected entry for a spec.
    #[must_use]
    pub fn new(spec: UpstreamSpec, client: UpstreamClient, is_static: bool) -> Self {
        Self {
            spec,
            client: Arc::new(client),
            tools: AsyncMutex::new(Vec::new()),
            is_static,
        }
    }
}

/// The outcome of a dispatched tool call, already flattened into text —
/// never a transport-level error. A disconnected or failing upstream is
/// reported as an `is_error` result, not a dropped connection to the host.
pub struct ToolCallOutcome {
    /// Human-readable result (or error message) text.
    pub text: String,
    /// Whether this outcome represents a failure.
    pub is_error: bool,
}

impl ToolCallOutcome {
    fn error(message: impl Into<String>) -> Self {
        Self {
            text: message.into(),
            is_error: true,
        }
    }
}

/// Upstream table plus dispatch. Readers (tool-call handlers) hold the
/// read lock only long enough to clone a client handle; writers
/// (management-tool handlers) hold the write lock across the whole
/// registration/removal operation.
#[derive(Default)]
pub struct Aggregator {
    upstreams: RwLock<HashMap<String, Arc<UpstreamEntry>>>,
}

impl Aggregator {
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new upstream entry under its spec's name.
    ///
    /// # Errors
    ///
    /// Returns [`ManagementError::AlreadyExists`] if the name is taken.
    pub async fn register(&self, entry: UpstreamEntry) -> Result<(), ManagementError> {
        let name = entry.spec.name.clone();
        let mut upstreams = self.upstreams.write().await;
        if upstreams.contains_key(&name) {
            return Err(ManagementError::AlreadyExists { name });
        }
        upstreams.insert(name, Arc::new(entry));
        Ok(())
    }

    /// Removes and returns the entry registered under `name`, if any.
    pub async fn remove(&self, name: &str) -> Option<Arc<UpstreamEntry>> {
        self.upstreams.write().await.remove(name)
    }

    /// Returns the entry registered under `name`, if any.
    pub async fn get(&self, name: &str) -> Option<Arc<UpstreamEntry>> {
        self.upstreams.read().await.get(name).cloned()
    }

    /// Returns all registered entries, ordered by name for stable display.
    pub async fn snapshot(&self) -> Vec<Arc<UpstreamEntry>> {
        let upstreams = self.upstreams.read().await;
        let mut entries: Vec<_> = upstreams.values().cloned().collect();
        entries.sort_by(|a, b| a.spec.name.cmp(&b.spec.name));
        entries
    }

    /// Refreshes the cached tool list for a registered, connected upstream.
    ///
    /// # Errors
    ///
    /// Returns [`ManagementError::NotFound`] if no such upstream is
    /// registered, or a wrapped [`crate::error::UpstreamError`] if the
    /// `tools/list` call fails.
    pub async fn refresh_tools(&self, name: &str) -> Result<(), ManagementError> {
        let entry = self
            .get(name)
            .await
            .ok_or_else(|| ManagementError::NotFound {
                name: name.to_string(),
            })?;
        let tools = entry.client.list_tools().await?;
        *entry.tools.lock().await = tools;
        Ok(())
    }

    /// Finds the upstream whose namespace prefix matches `full_name`,
    /// returning it alongside the tool's original (unprefixed) name.
    ///
    /// Re-resolved from the live table on every call, never a captured
    /// reference. Ties broken by longest matching prefix, which config
    /// validation's duplicate-prefix rejection makes moot in practice.
    async fn resolve(&self, full_name: &str) -> Option<(Arc<UpstreamEntry>, String)> {
        let upstreams = self.upstreams.read().await;
        let mut best: Option<(Arc<UpstreamEntry>, usize)> = None;
        for entry in upstreams.values() {
            let marker_len = entry.spec.prefix.len() + 1;
            let has_marker = full_name.len() > marker_len
                && full_name.starts_with(entry.spec.prefix.as_str())
                && full_name.as_bytes().get(entry.spec.prefix.len()) == Some(&b'_');
            if has_marker && best.as_ref().map_or(true, |(_, len)| marker_len > *len) {
                best = Some((Arc::clone(entry), marker_len));
            }
        }
        best.map(|(entry, marker_len)| {
            let original_name = full_name[marker_len..].to_string();
            (entry, original_name)
        })
    }

    /// Lists every tool currently known across all registered upstreams,
    /// namespaced as `"<prefix>_<original-name>"`.
    pub async fn list_tools(&self) -> Vec<ToolInfo> {
        let upstreams = self.upstreams.read().await;
        let mut result = Vec::new();
        for entry in upstreams.values() {
            let tools = entry.tools.lock().await;
            for tool in tools.iter() {
                result.push(ToolInfo {
                    name: format!("{}_{}", entry.spec.prefix, tool.name),
                    description: tool.description.clone(),
                    input_schema: tool.input_schema.clone(),
                });
            }
        }
        result
    }

    /// Dispatches a namespaced tool call to its owning upstream.
    ///
    /// Follows the handler contract: resolve under a brief read lock,
    /// check liveness, perform the call without holding any lock, and
    /// classify connection failures by closing the client (which flips
    /// `is_connected` for the next caller) rather than propagating a
    /// transport error to the host.
    pub async fn dispatch_tool_call(&self, full_name: &str, arguments: Value) -> ToolCallOutcome {
        let Some((entry, original_name)) = self.resolve(full_name).await else {
            return ToolCallOutcome::error(format!(
                "no tool named '{full_name}' is registered"
            ));
        };

        if !entry.client.is_connected().await {
            return ToolCallOutcome::error(format!(
                "upstream '{}' is not connected; call server_reconnect to restore it",
                entry.spec.name
            ));
        }

        match entry.client.call_tool(&original_name, arguments).await {
            Ok(result) => ToolCallOutcome {
                text: result.flatten_text(),
                is_error: result.is_error(),
            },
            Err(error) => {
                let name = entry.spec.name.clone();
                if error.is_connection_failure() {
                    entry.client.close().await;
                    ToolCallOutcome::error(format!(
                        "[{name}] {error}; call server_reconnect to restore it"
                    ))
                } else {
                    ToolCallOutcome::error(format!("[{name}] {error}"))
                }
            }
        }
    }
}
