//! SSE bridge integration tests: stream lifecycle (S5) and
//! reload-driven tear-down (S6), against a real bound HTTP listener and
//! a real stdio fixture provider.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use mcp_gateway::config::{GatewaySettings, ProviderConfig, ProvidersSnapshot, StdioParameters, WorkspacesSnapshot};
use mcp_gateway::gateway::Bridge;

fn fake_provider_path() -> String {
    env!("CARGO_BIN_EXE_fake_provider").to_string()
}

fn snapshots(namespace: &str) -> (ProvidersSnapshot, WorkspacesSnapshot) {
    let provider = ProviderConfig::Stdio {
        namespace: namespace.to_string(),
        provider_parameters: StdioParameters {
            command: fake_provider_path(),
            args: Vec::new(),
            env: HashMap::new(),
        },
    };
    let providers = ProvidersSnapshot(HashMap::from([("p1".to_string(), provider)]));
    let workspaces = WorkspacesSnapshot(HashMap::from([("w1".to_string(), vec![namespace.to_string()])]));
    (providers, workspaces)
}

async fn spawn_bridge(providers: ProvidersSnapshot, workspaces: WorkspacesSnapshot) -> (Arc<Bridge>, String) {
    let mut settings = GatewaySettings::default();
    settings.sse_keep_alive_interval = Duration::from_secs(30);

    let bridge = Bridge::new(providers, workspaces, settings);
    let app = Arc::clone(&bridge).into_router();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (bridge, format!("http://{addr}"))
}

/// S5 — opening the SSE stream yields `text/event-stream` headers and a
/// `streamOpened` lifecycle event first.
#[tokio::test]
async fn get_stream_opens_with_lifecycle_event() {
    let (providers, workspaces) = snapshots("echo");
    let (_bridge, base_url) = spawn_bridge(providers, workspaces).await;

    let response = reqwest::get(format!("{base_url}/mcp/w1")).await.unwrap();
    assert!(response.status().is_success());
    let content_type = response.headers().get("content-type").unwrap().to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/event-stream"));
    assert!(response.headers().contains_key("mcp-session-id"));

    let mut stream = response.bytes_stream();
    let chunk = tokio::time::timeout(Duration::from_secs(5), stream.next()).await.unwrap().unwrap().unwrap();
    let text = String::from_utf8_lossy(&chunk);
    assert!(text.contains("event: lifecycle"));
    assert!(text.contains("streamOpened"));
}

/// Unknown workspaces are rejected with `404` rather than opening a
/// session with zero providers.
#[tokio::test]
async fn get_stream_rejects_unknown_workspace() {
    let (providers, workspaces) = snapshots("echo");
    let (_bridge, base_url) = spawn_bridge(providers, workspaces).await;

    let response = reqwest::get(format!("{base_url}/mcp/nope")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

/// S6 — a reload suspends the bridge (new `GET`s see `503`), tears down
/// active sessions, then resumes once the snapshot is swapped back in.
#[tokio::test]
async fn suspend_rejects_new_streams_and_resume_restores_service() {
    let (providers, workspaces) = snapshots("echo");
    let (bridge, base_url) = spawn_bridge(providers, workspaces).await;

    bridge.suspend();
    let response = reqwest::get(format!("{base_url}/mcp/w1")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

    let (providers2, workspaces2) = snapshots("echo");
    bridge.update_snapshots(providers2, workspaces2);
    bridge.resume();

    let response = reqwest::get(format!("{base_url}/mcp/w1")).await.unwrap();
    assert!(response.status().is_success());
}

/// `close_all` tears every live session down with a terminal
/// `streamClosed` lifecycle event carrying the given reason.
#[tokio::test]
async fn close_all_emits_stream_closed_with_reason() {
    let (providers, workspaces) = snapshots("echo");
    let (bridge, base_url) = spawn_bridge(providers, workspaces).await;

    let response = reqwest::get(format!("{base_url}/mcp/w1")).await.unwrap();
    let mut stream = response.bytes_stream();
    // Drain the streamOpened event before closing.
    let _ = tokio::time::timeout(Duration::from_secs(5), stream.next()).await.unwrap().unwrap().unwrap();

    bridge.close_all("reload").await;

    let chunk = tokio::time::timeout(Duration::from_secs(5), stream.next()).await.unwrap().unwrap().unwrap();
    let text = String::from_utf8_lossy(&chunk);
    assert!(text.contains("streamClosed"));
    assert!(text.contains("reload"));
}

/// `healthz` reports the number of resolvable providers per workspace.
#[tokio::test]
async fn healthz_reports_resolvable_provider_counts() {
    let (providers, workspaces) = snapshots("echo");
    let (_bridge, base_url) = spawn_bridge(providers, workspaces).await;

    let body: serde_json::Value = reqwest::get(format!("{base_url}/healthz")).await.unwrap().json().await.unwrap();
    assert_eq!(body["workspaces"]["w1"], 1);
}
