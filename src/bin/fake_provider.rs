//! Minimal stdio MCP provider used only by the integration tests under
//! `tests/`. Speaks just enough JSON-RPC to exercise the router: one
//! tool (`say`), one prompt (`greet`), and a handful of env-var knobs
//! that let a test provoke specific failure modes without a second
//! binary per scenario.
//!
//! Knobs (all read from the environment):
//! - `FAKE_PROVIDER_FAIL_INIT=1`    — `initialize` returns a JSON-RPC error
//! - `FAKE_PROVIDER_EXIT_BEFORE_INIT=1` — exit immediately, no handshake
//! - `FAKE_PROVIDER_NO_TOOLS=1`     — `initialize` omits the tools capability
//! - `FAKE_PROVIDER_NO_PROMPTS=1`   — `initialize` omits the prompts capability
//! - `FAKE_PROVIDER_DELAY_MS=N`     — sleep N ms before answering `tools/call`

use std::io::{self, BufRead, Write};
use std::time::Duration;

use serde_json::{Value, json};

fn flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| v == "1")
}

fn main() {
    if flag("FAKE_PROVIDER_EXIT_BEFORE_INIT") {
        std::process::exit(1);
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let Ok(request) = serde_json::from_str::<Value>(&line) else {
            continue;
        };

        let Some(method) = request.get("method").and_then(Value::as_str) else {
            continue;
        };
        let id = request.get("id").cloned();

        // Notifications carry no id and expect no response.
        if id.is_none() {
            continue;
        }

        let response = handle(method, &request);
        let line = serde_json::to_string(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": response.as_ref().ok(),
            "error": response.as_ref().err(),
        }))
        .unwrap();
        let _ = stdout.write_all(line.as_bytes());
        let _ = stdout.write_all(b"\n");
        let _ = stdout.flush();
    }
}

fn handle(method: &str, request: &Value) -> Result<Value, Value> {
    match method {
        "initialize" => {
            if flag("FAKE_PROVIDER_FAIL_INIT") {
                return Err(json!({"code": -32000, "message": "initialize refused"}));
            }
            let mut capabilities = json!({});
            if !flag("FAKE_PROVIDER_NO_TOOLS") {
                capabilities["tools"] = json!({"listChanged": false});
            }
            if !flag("FAKE_PROVIDER_NO_PROMPTS") {
                capabilities["prompts"] = json!({"listChanged": false});
            }
            Ok(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": capabilities,
                "serverInfo": {"name": "fake-provider", "version": "0.0.0"}
            }))
        }
        "tools/list" => Ok(json!({
            "tools": [{
                "name": "say",
                "description": "echoes its input back as text",
                "inputSchema": {"type": "object", "properties": {"text": {"type": "string"}}}
            }]
        })),
        "tools/call" => {
            if let Ok(ms) = std::env::var("FAKE_PROVIDER_DELAY_MS") {
                if let Ok(ms) = ms.parse::<u64>() {
                    std::thread::sleep(Duration::from_millis(ms));
                }
            }
            let params = request.get("params").cloned().unwrap_or(Value::Null);
            Ok(json!({
                "content": [{"type": "text", "text": params.to_string()}],
                "isError": false
            }))
        }
        "prompts/list" => Ok(json!({
            "prompts": [{
                "name": "greet",
                "description": "greets someone by name",
                "arguments": [{"name": "who", "required": true}]
            }]
        })),
        "prompts/get" => {
            let who = request
                .get("params")
                .and_then(|p| p.get("arguments"))
                .and_then(|a| a.get("who"))
                .and_then(Value::as_str)
                .unwrap_or("world")
                .to_string();
            Ok(json!({
                "description": "a greeting",
                "messages": [{"role": "user", "content": {"type": "text", "text": format!("hello, {who}")}}]
            }))
        }
        other => Err(json!({"code": -32601, "message": format!("method not found: {other}")})),
    }
}
