//! Environment-builder and per-call-timeout behavior, observed end to end
//! through a real `mock-upstream` child process.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use mcp_aggregator::config::InheritPolicy;
use mcp_aggregator::management::ManagementTools;
use mcp_aggregator::registry::Aggregator;

fn mock_upstream_path() -> &'static str {
    env!("CARGO_BIN_EXE_mock-upstream")
}

fn management_tools(parent_env: HashMap<String, String>) -> (Arc<Aggregator>, ManagementTools) {
    let aggregator = Arc::new(Aggregator::new());
    let tools = ManagementTools::new(Arc::clone(&aggregator), InheritPolicy::default(), parent_env);
    (aggregator, tools)
}

/// A variable outside the tier-1 baseline and not named in `extra` or
/// `prefix` never reaches the child, even though it is present in the
/// parent's snapshot.
#[tokio::test]
async fn unlisted_parent_variable_is_not_inherited_by_default() {
    let mut parent_env = HashMap::new();
    parent_env.insert("SOME_SECRET_TOKEN".to_string(), "top-secret".to_string());
    let (aggregator, tools) = management_tools(parent_env);

    tools
        .server_add(json!({"name": "echo", "command": mock_upstream_path()}))
        .await;

    let outcome = aggregator
        .dispatch_tool_call("echo_printenv", json!({"name": "SOME_SECRET_TOKEN"}))
        .await;
    assert!(!outcome.is_error);
    assert_eq!(outcome.text, "");
}

/// `inherit.extra` on the spec widens the child's environment with a
/// specific parent variable by name.
#[tokio::test]
async fn extra_inherit_entry_passes_a_named_parent_variable_through() {
    let mut parent_env = HashMap::new();
    parent_env.insert("MY_APP_TOKEN".to_string(), "abc123".to_string());
    let (aggregator, tools) = management_tools(parent_env);

    tools
        .server_add(json!({
            "name": "echo",
            "command": mock_upstream_path(),
            "inherit": {"mode": "tier1", "extra": ["MY_APP_TOKEN"]}
        }))
        .await;

    let outcome = aggregator
        .dispatch_tool_call("echo_printenv", json!({"name": "MY_APP_TOKEN"}))
        .await;
    assert!(!outcome.is_error);
    assert_eq!(outcome.text, "abc123");
}

/// A spec's own `env` map always reaches the child, even for a name that
/// would otherwise be implicitly denied.
#[tokio::test]
async fn spec_env_overlay_bypasses_the_implicit_denylist() {
    let (aggregator, tools) = management_tools(HashMap::new());

    tools
        .server_add(json!({
            "name": "echo",
            "command": mock_upstream_path(),
            "env": {"HTTP_PROXY": "http://127.0.0.1:9"}
        }))
        .await;

    let outcome = aggregator
        .dispatch_tool_call("echo_printenv", json!({"name": "HTTP_PROXY"}))
        .await;
    assert!(!outcome.is_error);
    assert_eq!(outcome.text, "http://127.0.0.1:9");
}

/// A call that outruns the spec's per-call timeout is reported as an
/// error, and classified as a connection failure so the next call sees
/// the upstream as disconnected rather than hanging again.
#[tokio::test]
async fn slow_call_past_the_configured_timeout_is_reported_as_an_error() {
    let (aggregator, tools) = management_tools(HashMap::new());

    tools
        .server_add(json!({
            "name": "echo",
            "command": mock_upstream_path(),
            "timeout": "50ms"
        }))
        .await;

    let outcome = aggregator
        .dispatch_tool_call("echo_sleep", json!({"ms": 2000}))
        .await;
    assert!(outcome.is_error);

    let follow_up = aggregator.dispatch_tool_call("echo_greet", json!({"who": "x"})).await;
    assert!(follow_up.is_error);
    assert!(follow_up.text.contains("server_reconnect"));
}

/// A call well inside the timeout budget succeeds normally.
#[tokio::test]
async fn fast_call_inside_the_timeout_budget_succeeds() {
    let (aggregator, tools) = management_tools(HashMap::new());

    tools
        .server_add(json!({
            "name": "echo",
            "command": mock_upstream_path(),
            "timeout": "5s"
        }))
        .await;

    let outcome = aggregator.dispatch_tool_call("echo_sleep", json!({"ms": 10})).await;
    assert!(!outcome.is_error);
    assert_eq!(outcome.text, "awake after 10ms");
}
