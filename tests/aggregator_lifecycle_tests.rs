//! End-to-end lifecycle tests against the `mock-upstream` helper binary:
//! add, call, disconnect, reconnect, and collision handling, driven
//! through the same [`mcp_aggregator::management::ManagementTools`] and
//! [`mcp_aggregator::registry::Aggregator`] paths the host-side MCP server
//! calls into.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use mcp_aggregator::config::InheritPolicy;
use mcp_aggregator::management::ManagementTools;
use mcp_aggregator::registry::Aggregator;

fn mock_upstream_path() -> &'static str {
    env!("CARGO_BIN_EXE_mock-upstream")
}

fn management_tools() -> (Arc<Aggregator>, ManagementTools) {
    let aggregator = Arc::new(Aggregator::new());
    let tools = ManagementTools::new(Arc::clone(&aggregator), InheritPolicy::default(), HashMap::new());
    (aggregator, tools)
}

/// Add a server, call its tool, disconnect it, observe the call being
/// refused while disconnected, reconnect with no command, and call it
/// again.
#[tokio::test]
async fn add_call_disconnect_reconnect_round_trip() {
    let (aggregator, tools) = management_tools();

    let add_outcome = tools
        .server_add(json!({"name": "echo", "command": mock_upstream_path()}))
        .await;
    assert!(!add_outcome.is_error, "server_add failed: {}", add_outcome.text);

    let first_call = aggregator.dispatch_tool_call("echo_greet", json!({"who": "a"})).await;
    assert!(!first_call.is_error);
    assert_eq!(first_call.text, "hi a");

    let disconnect_outcome = tools.server_disconnect(json!({"name": "echo"})).await;
    assert!(!disconnect_outcome.is_error);

    let call_while_disconnected = aggregator.dispatch_tool_call("echo_greet", json!({"who": "a"})).await;
    assert!(call_while_disconnected.is_error);
    assert!(call_while_disconnected.text.contains("server_reconnect"));

    let reconnect_outcome = tools.server_reconnect(json!({"name": "echo"})).await;
    assert!(!reconnect_outcome.is_error, "reconnect failed: {}", reconnect_outcome.text);

    let second_call = aggregator.dispatch_tool_call("echo_greet", json!({"who": "a"})).await;
    assert!(!second_call.is_error);
    assert_eq!(second_call.text, "hi a");
}

/// After disconnect/reconnect with no command, calls reach a genuinely
/// new child process (observed via its PID), not the old one.
#[tokio::test]
async fn reconnect_spawns_a_new_child_process() {
    let (aggregator, tools) = management_tools();
    tools
        .server_add(json!({"name": "echo", "command": mock_upstream_path()}))
        .await;

    let first_pid = aggregator.dispatch_tool_call("echo_pid", json!({})).await.text;

    tools.server_disconnect(json!({"name": "echo"})).await;
    tools.server_reconnect(json!({"name": "echo"})).await;

    let second_pid = aggregator.dispatch_tool_call("echo_pid", json!({})).await.text;

    assert_ne!(first_pid, second_pid, "reconnect should spawn a fresh child");
}

/// `server_disconnect` is idempotent.
#[tokio::test]
async fn disconnect_twice_is_a_noop_the_second_time() {
    let (_aggregator, tools) = management_tools();
    tools
        .server_add(json!({"name": "echo", "command": mock_upstream_path()}))
        .await;

    let first = tools.server_disconnect(json!({"name": "echo"})).await;
    assert!(!first.is_error);

    let second = tools.server_disconnect(json!({"name": "echo"})).await;
    assert!(!second.is_error);
    assert!(second.text.contains("already disconnected"));
}

/// `server_remove` closes a still-connected upstream itself, rather than
/// requiring a prior `server_disconnect`.
#[tokio::test]
async fn remove_closes_a_still_connected_upstream() {
    let (aggregator, tools) = management_tools();
    tools
        .server_add(json!({"name": "echo", "command": mock_upstream_path()}))
        .await;

    let remove_outcome = tools.server_remove(json!({"name": "echo"})).await;
    assert!(!remove_outcome.is_error, "server_remove failed: {}", remove_outcome.text);

    let call = aggregator.dispatch_tool_call("echo_greet", json!({"who": "a"})).await;
    assert!(call.is_error);
    assert!(call.text.contains("no tool named"));
}

/// A second `server_add` with a name already in use is rejected and
/// does not spawn a child.
#[tokio::test]
async fn duplicate_name_is_rejected_without_spawning() {
    let (_aggregator, tools) = management_tools();
    let first = tools
        .server_add(json!({"name": "fs", "command": mock_upstream_path()}))
        .await;
    assert!(!first.is_error);

    let second = tools
        .server_add(json!({"name": "fs", "command": mock_upstream_path()}))
        .await;
    assert!(second.is_error);
    assert!(second.text.contains("already exists"));
}

/// Remove (while still connected, with no prior disconnect) then re-add
/// under the same name re-registers the same tool set.
#[tokio::test]
async fn remove_then_add_reregisters_the_same_tools() {
    let (aggregator, tools) = management_tools();
    tools
        .server_add(json!({"name": "echo", "command": mock_upstream_path()}))
        .await;
    let remove_outcome = tools.server_remove(json!({"name": "echo"})).await;
    assert!(!remove_outcome.is_error);

    let add_outcome = tools
        .server_add(json!({"name": "echo", "command": mock_upstream_path()}))
        .await;
    assert!(!add_outcome.is_error);

    let call = aggregator.dispatch_tool_call("echo_greet", json!({"who": "again"})).await;
    assert!(!call.is_error);
    assert_eq!(call.text, "hi again");
}

/// A tool-reported failure (not a transport failure) is surfaced as an
/// error result without disconnecting the upstream.
#[tokio::test]
async fn tool_reported_failure_does_not_disconnect_the_upstream() {
    let (aggregator, tools) = management_tools();
    tools
        .server_add(json!({"name": "echo", "command": mock_upstream_path()}))
        .await;

    let call = aggregator.dispatch_tool_call("echo_fail", json!({})).await;
    assert!(call.is_error);

    let follow_up = aggregator.dispatch_tool_call("echo_greet", json!({"who": "still-here"})).await;
    assert!(!follow_up.is_error);
    assert_eq!(follow_up.text, "hi still-here");
}

/// `server_reconnect` while still connected is refused; the operator must
/// disconnect first.
#[tokio::test]
async fn reconnect_while_connected_is_refused() {
    let (_aggregator, tools) = management_tools();
    tools
        .server_add(json!({"name": "echo", "command": mock_upstream_path()}))
        .await;

    let outcome = tools.server_reconnect(json!({"name": "echo"})).await;
    assert!(outcome.is_error);
    assert!(outcome.text.contains("disconnect"));
}

/// `server_list` sections static vs. dynamic upstreams and renders a
/// truncated tool listing.
#[tokio::test]
async fn server_list_reports_registered_upstream_and_its_tools() {
    let (_aggregator, tools) = management_tools();
    tools
        .server_add(json!({"name": "echo", "command": mock_upstream_path()}))
        .await;

    let outcome = tools.server_list(json!({})).await;
    assert!(!outcome.is_error);
    assert!(outcome.text.contains("dynamic servers"));
    assert!(outcome.text.contains("echo"));
    assert!(outcome.text.contains("connected"));
}

/// `server_reconnect` with a replacement command line is lossy: the
/// original `env`/`inherit` are dropped, but `name`/`prefix` and the new
/// command are honored.
#[tokio::test]
async fn reconnect_with_new_command_replaces_the_launch_recipe() {
    let (aggregator, tools) = management_tools();
    tools
        .server_add(json!({"name": "echo", "command": mock_upstream_path(), "env": {"FOO": "bar"}}))
        .await;
    tools.server_disconnect(json!({"name": "echo"})).await;

    let outcome = tools
        .server_reconnect(json!({"name": "echo", "command": mock_upstream_path()}))
        .await;
    assert!(!outcome.is_error, "reconnect with command failed: {}", outcome.text);

    let call = aggregator.dispatch_tool_call("echo_greet", json!({"who": "rebuilt"})).await;
    assert!(!call.is_error);
    assert_eq!(call.text, "hi rebuilt");
}
