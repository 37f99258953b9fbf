//! Mock upstream MCP server binary for integration testing.
//!
//! Spawned as a subprocess by the integration tests in this directory to
//! stand in for a real upstream MCP server. Speaks newline-delimited
//! JSON-RPC 2.0 over its own stdio exactly as the proxy expects: an
//! `initialize` handshake, `tools/list`, and `tools/call` for a small
//! fixed set of test tools.
//!
//! Tools exposed:
//!
//! - `greet {who}` → text `"hi <who>"`.
//! - `pid {}` → text containing this process's PID, so a test can tell two
//!   spawned instances apart across a hot-swap.
//! - `sleep {ms}` → sleeps `ms` milliseconds, then returns `"awake after
//!   <ms>ms"`; used to exercise per-call timeouts.
//! - `printenv {name}` → the named environment variable's value, or an
//!   empty string if unset; used to observe what the environment builder
//!   actually handed the child.
//! - `fail {}` → a tool-reported error result (`isError: true`), to
//!   distinguish a normal tool failure from a transport failure.
//!
//! Usage: `mock-upstream [--init-delay-ms <n>]`. `--init-delay-ms` delays
//! the `initialize` response, used to test handshake timeouts.

use std::io::{self, BufRead, Write};
use std::time::Duration;

use serde_json::{json, Value};

fn main() {
    let mut init_delay_ms: u64 = 0;
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--init-delay-ms" => {
                if let Some(value) = args.get(i + 1) {
                    init_delay_ms = value.parse().unwrap_or(0);
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            continue;
        };

        let Some(method) = message.get("method").and_then(Value::as_str) else {
            continue;
        };
        let id = message.get("id").cloned();

        match method {
            "initialize" => {
                if init_delay_ms > 0 {
                    std::thread::sleep(Duration::from_millis(init_delay_ms));
                }
                if let Some(id) = id {
                    write_response(
                        &mut stdout,
                        id,
                        json!({
                            "protocolVersion": "2024-11-05",
                            "capabilities": {},
                            "serverInfo": {"name": "mock-upstream", "version": "0.0.0"}
                        }),
                    );
                }
            }
            "notifications/initialized" => {}
            "tools/list" => {
                if let Some(id) = id {
                    write_response(&mut stdout, id, json!({ "tools": tool_list() }));
                }
            }
            "tools/call" => {
                if let Some(id) = id {
                    let result = handle_tool_call(&message);
                    write_response(&mut stdout, id, result);
                }
            }
            _ => {
                if let Some(id) = id {
                    write_response(
                        &mut stdout,
                        id,
                        json!({"error": {"code": -32601, "message": "method not found"}}),
                    );
                }
            }
        }
    }
}

fn tool_list() -> Value {
    json!([
        {"name": "greet", "description": "Greets someone.", "inputSchema": {"type": "object", "properties": {"who": {"type": "string"}}}},
        {"name": "pid", "description": "Returns this process's PID.", "inputSchema": {"type": "object"}},
        {"name": "sleep", "description": "Sleeps for a number of milliseconds.", "inputSchema": {"type": "object", "properties": {"ms": {"type": "integer"}}}},
        {"name": "printenv", "description": "Reads an environment variable.", "inputSchema": {"type": "object", "properties": {"name": {"type": "string"}}}},
        {"name": "fail", "description": "Always reports a tool-level error.", "inputSchema": {"type": "object"}},
    ])
}

fn handle_tool_call(message: &Value) -> Value {
    let params = message.get("params").cloned().unwrap_or(Value::Null);
    let name = params.get("name").and_then(Value::as_str).unwrap_or("");
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

    match name {
        "greet" => {
            let who = arguments.get("who").and_then(Value::as_str).unwrap_or("there");
            text_result(format!("hi {who}"))
        }
        "pid" => text_result(format!("pid={}", std::process::id())),
        "sleep" => {
            let ms = arguments.get("ms").and_then(Value::as_u64).unwrap_or(0);
            std::thread::sleep(Duration::from_millis(ms));
            text_result(format!("awake after {ms}ms"))
        }
        "printenv" => {
            let var_name = arguments.get("name").and_then(Value::as_str).unwrap_or("");
            let value = std::env::var(var_name).unwrap_or_default();
            text_result(value)
        }
        "fail" => error_result("deliberate failure"),
        other => error_result(format!("unknown tool '{other}'")),
    }
}

fn text_result(text: String) -> Value {
    json!({"content": [{"type": "text", "text": text}], "isError": false})
}

fn error_result(text: impl Into<String>) -> Value {
    json!({"content": [{"type": "text", "text": text.into()}], "isError": true})
}

fn write_response(stdout: &mut io::Stdout, id: Value, result: Value) {
    let envelope = if let Some(error) = result.get("error") {
        json!({"jsonrpc": "2.0", "id": id, "error": error})
    } else {
        json!({"jsonrpc": "2.0", "id": id, "result": result})
    };
    let Ok(serialized) = serde_json::to_string(&envelope) else {
        return;
    };
    let _ = writeln!(stdout, "{serialized}");
    let _ = stdout.flush();
}
