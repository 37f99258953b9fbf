//! The five reflective management tools: `server_add`, `server_remove`,
//! `server_disconnect`, `server_reconnect`, `server_list`.
//!
//! Each handler parses its params, validates them, and builds a result
//! string, never a transport-level error. A malformed call or a dead
//! upstream is reported as `is_error` tool-result text, never a dropped
//! host connection.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

use crate::config::{InheritPolicy, UpstreamSpec};
use crate::error::ManagementError;
use crate::registry::{Aggregator, ToolCallOutcome, UpstreamEntry};
use crate::upstream::{build_env, ToolInfo, UpstreamClient};

/// Holds what `server_add`/`server_reconnect` need beyond a bare spec: the
/// proxy-level inherit default and a one-time snapshot of the parent
/// process's environment, taken at startup.
///
/// `lock` serializes the five handlers against each other: each is held
/// for the handler's full duration, including the outbound child I/O a
/// `server_add`/`server_reconnect` performs, so two concurrent operator
/// calls never race on the same name or prefix.
pub struct ManagementTools {
    aggregator: Arc<Aggregator>,
    proxy_inherit: InheritPolicy,
    parent_env: HashMap<String, String>,
    lock: AsyncMutex<()>,
}

impl ManagementTools {
    /// Builds the management-tool handler set.
    #[must_use]
    pub fn new(
        aggregator: Arc<Aggregator>,
        proxy_inherit: InheritPolicy,
        parent_env: HashMap<String, String>,
    ) -> Self {
        Self {
            aggregator,
            proxy_inherit,
            parent_env,
            lock: AsyncMutex::new(()),
        }
    }

    /// Registers a server from the initial configuration, at startup,
    /// before the host-side adapter starts serving. Shares the same
    /// spawn/handshake/register path as `server_add`, but the resulting
    /// entry is marked static for `server_list`'s rendering.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagementError`] if the spec fails validation or the
    /// spawn/handshake fails.
    pub async fn register_static(&self, spec: UpstreamSpec) -> Result<String, ManagementError> {
        let _guard = self.lock.lock().await;
        spec.validate()
            .map_err(|e| ManagementError::InvalidCommand { message: e.to_string() })?;
        self.spawn_and_register(spec, true).await
    }

    /// Adds a new upstream: parses and validates its spec, spawns it,
    /// performs the handshake, and caches its tool list.
    pub async fn server_add(&self, params: Value) -> ToolCallOutcome {
        let _guard = self.lock.lock().await;

        let params = match normalize_add_params(params) {
            Ok(params) => params,
            Err(message) => return tool_error(message),
        };

        let spec: UpstreamSpec = match serde_json::from_value(params) {
            Ok(spec) => spec,
            Err(error) => return tool_error(format!("invalid server_add parameters: {error}")),
        };

        if let Err(error) = spec.validate() {
            return tool_error(error.to_string());
        }

        if self.aggregator.get(&spec.name).await.is_some() {
            return tool_error(format!("server '{}' already exists", spec.name));
        }
        if self.prefix_in_use(&spec.prefix).await {
            return tool_error(format!("prefix '{}' is already in use", spec.prefix));
        }

        match self.spawn_and_register(spec, false).await {
            Ok(name) => tool_ok(format!("server '{name}' added and connected")),
            Err(error) => tool_error(error.to_string()),
        }
    }

    /// Removes a registered upstream, closing its client first if still
    /// connected.
    pub async fn server_remove(&self, params: Value) -> ToolCallOutcome {
        let _guard = self.lock.lock().await;

        let name = match extract_name(&params) {
            Ok(name) => name,
            Err(message) => return tool_error(message),
        };

        let Some(entry) = self.aggregator.get(&name).await else {
            return tool_error(format!("server '{name}' not found"));
        };

        entry.client.close().await;
        self.aggregator.remove(&name).await;
        tool_ok(format!(
            "server '{name}' removed. Tool handlers previously bound for it remain registered \
             on the host and will report 'not found' errors."
        ))
    }

    /// Closes the child process and stops accepting calls for it.
    /// Idempotent; the entry remains registered for `server_list`
    /// visibility and for `server_reconnect`.
    pub async fn server_disconnect(&self, params: Value) -> ToolCallOutcome {
        let _guard = self.lock.lock().await;

        let name = match extract_name(&params) {
            Ok(name) => name,
            Err(message) => return tool_error(message),
        };

        let Some(entry) = self.aggregator.get(&name).await else {
            return tool_error(format!("server '{name}' not found"));
        };

        if !entry.client.is_connected().await {
            return tool_ok(format!("server '{name}' is already disconnected"));
        }

        entry.client.close().await;
        tool_ok(format!("server '{name}' disconnected"))
    }

    /// Reconnects a registered upstream. With no overrides, relaunches the
    /// stored spec unchanged. If `command` is present in `params`, the
    /// reconnect is lossy: a brand new spec is built from `params` (name
    /// and prefix carried over, everything else replaced, not merged with
    /// the old spec).
    pub async fn server_reconnect(&self, params: Value) -> ToolCallOutcome {
        let _guard = self.lock.lock().await;

        let name = match extract_name(&params) {
            Ok(name) => name,
            Err(message) => return tool_error(message),
        };

        let Some(old_entry) = self.aggregator.get(&name).await else {
            return tool_error(format!("server '{name}' not found"));
        };

        if old_entry.client.is_connected().await {
            return tool_error(format!(
                "server '{name}' is still connected; run server_disconnect first"
            ));
        }

        let is_static = old_entry.is_static;

        let new_spec = if params.get("command").is_some() {
            let mut value = match split_command_line(params.clone()) {
                Ok(value) => value,
                Err(message) => return tool_error(message),
            };
            if let Value::Object(map) = &mut value {
                map.insert("name".to_string(), Value::String(name.clone()));
                map.insert(
                    "prefix".to_string(),
                    Value::String(old_entry.spec.prefix.clone()),
                );
            }
            match serde_json::from_value::<UpstreamSpec>(value) {
                Ok(spec) => spec,
                Err(error) => {
                    return tool_error(format!("invalid server_reconnect parameters: {error}"))
                }
            }
        } else {
            old_entry.spec.clone()
        };

        if let Err(error) = new_spec.validate() {
            return tool_error(error.to_string());
        }

        self.aggregator.remove(&name).await;

        match self.spawn_and_register(new_spec, is_static).await {
            Ok(_) => tool_ok(format!("server '{name}' reconnected")),
            Err(error) => tool_error(error.to_string()),
        }
    }

    /// Renders a two-section table of every registered upstream (static
    /// upstreams from the initial configuration, then dynamic ones added
    /// at runtime): name, prefix, connection status, and a truncated
    /// tool-name listing.
    pub async fn server_list(&self, _params: Value) -> ToolCallOutcome {
        let entries = self.aggregator.snapshot().await;
        if entries.is_empty() {
            return tool_ok("no upstream servers are registered".to_string());
        }

        let (static_entries, dynamic_entries): (Vec<_>, Vec<_>) =
            entries.iter().partition(|entry| entry.is_static);

        let mut sections = Vec::new();
        if !static_entries.is_empty() {
            sections.push(Self::render_section("static servers", &static_entries).await);
        }
        if !dynamic_entries.is_empty() {
            sections.push(Self::render_section("dynamic servers", &dynamic_entries).await);
        }
        tool_ok(sections.join("\n\n"))
    }

    async fn render_section(title: &str, entries: &[&Arc<UpstreamEntry>]) -> String {
        const MAX_TOOLS_SHOWN: usize = 5;
        const MAX_TOOLS_TRUNCATED: usize = 3;

        let mut lines = vec![format!("{title}:")];
        for entry in entries {
            let status = if entry.client.is_connected().await {
                "connected"
            } else {
                "disconnected"
            };
            let tools = entry.tools.lock().await;
            let tool_text = if tools.len() > MAX_TOOLS_SHOWN {
                let shown: Vec<&str> = tools
                    .iter()
                    .take(MAX_TOOLS_TRUNCATED)
                    .map(|t| t.name.as_str())
                    .collect();
                format!("{}, and {} more", shown.join(", "), tools.len() - MAX_TOOLS_TRUNCATED)
            } else {
                tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(", ")
            };
            lines.push(format!(
                "  {:<10} prefix={:<10} {:<13} tools: {}",
                entry.spec.name, entry.spec.prefix, status, tool_text
            ));
        }
        lines.join("\n")
    }

    async fn prefix_in_use(&self, prefix: &str) -> bool {
        self.aggregator
            .snapshot()
            .await
            .iter()
            .any(|entry| entry.spec.prefix == prefix)
    }

    async fn spawn_and_register(
        &self,
        spec: UpstreamSpec,
        is_static: bool,
    ) -> Result<String, ManagementError> {
        let env = build_env(&spec, &self.proxy_inherit, &self.parent_env);
        let client = UpstreamClient::new(spec.name.clone(), spec.timeout);
        client.connect(&spec.command, &spec.args, &env).await?;
        client.initialize().await?;
        let tools: Vec<ToolInfo> = client.list_tools().await?;

        let name = spec.name.clone();
        let entry = UpstreamEntry::new(spec, client, is_static);
        *entry.tools.lock().await = tools;
        self.aggregator.register(entry).await?;
        Ok(name)
    }
}

/// Prepares raw `server_add` parameters for deserialization into
/// [`UpstreamSpec`]: the common case takes only `{name, command}`, with
/// `command` a whitespace-separated command line whose first token is the
/// executable. Splits it into `command`/`args` (unless the caller already
/// supplied `args` explicitly) and defaults `prefix` to `name` when
/// omitted.
fn normalize_add_params(params: Value) -> Result<Value, String> {
    let mut params = split_command_line(params)?;
    if let Value::Object(map) = &mut params {
        if !map.contains_key("prefix") {
            if let Some(name) = map.get("name").and_then(Value::as_str) {
                map.insert("prefix".to_string(), Value::String(name.to_string()));
            }
        }
    }
    Ok(params)
}

/// Splits a `command` field by whitespace into an executable plus argv,
/// unless the params object already carries an explicit `args` array (the
/// generalized form also advertised in the tool's input schema).
fn split_command_line(mut params: Value) -> Result<Value, String> {
    let Value::Object(map) = &mut params else {
        return Ok(params);
    };
    if map.contains_key("args") {
        return Ok(params);
    }
    let Some(command) = map.get("command").and_then(Value::as_str) else {
        return Ok(params);
    };
    let mut tokens = command.split_whitespace();
    let Some(executable) = tokens.next() else {
        return Err("command cannot be empty".to_string());
    };
    let args: Vec<Value> = tokens.map(|t| Value::String(t.to_string())).collect();
    let executable = executable.to_string();
    map.insert("command".to_string(), Value::String(executable));
    map.insert("args".to_string(), Value::Array(args));
    Ok(params)
}

fn extract_name(params: &Value) -> Result<String, String> {
    params
        .get("name")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| "missing required 'name' parameter".to_string())
}

fn tool_ok(text: impl Into<String>) -> ToolCallOutcome {
    ToolCallOutcome {
        text: text.into(),
        is_error: false,
    }
}

fn tool_error(text: impl Into<String>) -> ToolCallOutcome {
    ToolCallOutcome {
        text: text.into(),
        is_error: true,
    }
}

/// Tool descriptors for the five management tools, merged with aggregated
/// upstream tools when the host calls `tools/list`.
#[must_use]
pub fn management_tool_descriptors() -> Vec<ToolInfo> {
    vec![
        ToolInfo {
            name: "server_add".to_string(),
            description: Some(
                "Register and connect a new upstream MCP server. 'command' is a \
                 whitespace-separated command line (first token is the executable) \
                 unless 'args' is also given explicitly. 'prefix' defaults to 'name'."
                    .to_string(),
            ),
            input_schema: Some(serde_json::json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "prefix": {"type": "string"},
                    "command": {"type": "string"},
                    "args": {"type": "array", "items": {"type": "string"}},
                    "env": {"type": "object"},
                    "inherit": {"type": "object"},
                    "timeout": {"type": "string"}
                },
                "required": ["name", "command"]
            })),
        },
        ToolInfo {
            name: "server_remove".to_string(),
            description: Some(
                "Remove a registered upstream server, disconnecting it first if still connected."
                    .to_string(),
            ),
            input_schema: Some(serde_json::json!({
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            })),
        },
        ToolInfo {
            name: "server_disconnect".to_string(),
            description: Some("Disconnect an upstream server's child process.".to_string()),
            input_schema: Some(serde_json::json!({
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            })),
        },
        ToolInfo {
            name: "server_reconnect".to_string(),
            description: Some(
                "Reconnect an upstream server, optionally with a replacement launch recipe."
                    .to_string(),
            ),
            input_schema: Some(serde_json::json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "command": {"type": "string"},
                    "args": {"type": "array", "items": {"type": "string"}},
                    "env": {"type": "object"},
                    "inherit": {"type": "object"},
                    "timeout": {"type": "string"}
                },
                "required": ["name"]
            })),
        },
        ToolInfo {
            name: "server_list".to_string(),
            description: Some(
                "List every registered upstream server and its connection status.".to_string(),
            ),
            input_schema: Some(serde_json::json!({"type": "object", "properties": {}})),
        },
    ]
}
