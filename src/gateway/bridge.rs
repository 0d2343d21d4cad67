//! SSE bridge: exposes a workspace as an HTTP/SSE MCP endpoint.
//! `GET /mcp/:workspace` opens a dedicated router session and streams
//! responses/notifications back as SSE events; `POST /mcp/:workspace`
//! accepts a JSON-RPC request for that session and returns `202
//! Accepted` immediately, with the actual response delivered on the
//! correlated GET stream.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_stream::stream;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router as AxumRouter};
use dashmap::DashMap;
use futures::Stream;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{GatewaySettings, ProvidersSnapshot, WorkspacesSnapshot};
use crate::protocol::{
    Info, InitializeResult, JsonRpcRequest, JsonRpcResponse, PromptsCapability, RequestId, ServerCapabilities,
    ToolsCapability, PROTOCOL_VERSION,
};
use crate::router::Router;

const SESSION_ID_HEADER: &str = "mcp-session-id";

/// A tagged SSE event for the bridge's single multiplexed stream per
/// session: a correlated response, a server-initiated notification, or
/// a lifecycle event (`streamOpened`, `ping`, `streamClosed`).
#[derive(Debug, Clone)]
enum BridgeEvent {
    Response(JsonRpcResponse),
    Lifecycle(Value),
}

struct BridgeSession {
    workspace: String,
    router: Arc<Router>,
    tx: broadcast::Sender<BridgeEvent>,
    pending: DashMap<String, ()>,
}

/// SSE front-end state: snapshots, settings, and the live set of
/// per-connection sessions.
pub struct Bridge {
    providers: parking_lot::RwLock<ProvidersSnapshot>,
    workspaces: parking_lot::RwLock<WorkspacesSnapshot>,
    settings: GatewaySettings,
    sessions: DashMap<String, Arc<BridgeSession>>,
    accepting: AtomicBool,
}

impl Bridge {
    /// Construct a bridge over the given snapshots and settings.
    #[must_use]
    pub fn new(providers: ProvidersSnapshot, workspaces: WorkspacesSnapshot, settings: GatewaySettings) -> Arc<Self> {
        Arc::new(Self {
            providers: parking_lot::RwLock::new(providers),
            workspaces: parking_lot::RwLock::new(workspaces),
            settings,
            sessions: DashMap::new(),
            accepting: AtomicBool::new(true),
        })
    }

    /// Swap in freshly re-read snapshots after a reload.
    pub fn update_snapshots(&self, providers: ProvidersSnapshot, workspaces: WorkspacesSnapshot) {
        *self.providers.write() = providers;
        *self.workspaces.write() = workspaces;
    }

    /// Build the axum router for this bridge.
    #[must_use]
    pub fn into_router(self: Arc<Self>) -> AxumRouter {
        AxumRouter::new()
            .route("/mcp/{workspace}", get(get_stream).post(post_message))
            .route("/healthz", get(healthz))
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }

    /// Mark the bridge as refusing new SSE connections (reload in
    /// progress). New `GET`s receive `503` until [`Bridge::resume`] is
    /// called.
    pub fn suspend(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    /// Resume accepting new SSE connections after a reload completes.
    pub fn resume(&self) {
        self.accepting.store(true, Ordering::SeqCst);
    }

    /// Tear down every active session with the given reload reason and
    /// clear the session table. Used by the reload supervisor.
    pub async fn close_all(&self, reason: &str) {
        let sessions: Vec<_> = self.sessions.iter().map(|e| Arc::clone(e.value())).collect();
        for session in sessions {
            close_session(&session, reason).await;
        }
        self.sessions.clear();
    }

    fn providers_for(&self, workspace: &str) -> Option<Vec<crate::config::ProviderConfig>> {
        let workspaces = self.workspaces.read();
        let names = workspaces.get(workspace)?;
        let by_namespace = self.providers.read().by_namespace();
        let mut resolved = Vec::new();
        for name in names {
            match by_namespace.get(name) {
                Some(config) => resolved.push(config.clone()),
                None => warn!(workspace, namespace = %name, "workspace references unknown provider namespace"),
            }
        }
        Some(resolved)
    }
}

async fn healthz(State(bridge): State<Arc<Bridge>>) -> Json<Value> {
    let mut counts = HashMap::new();
    let names: Vec<String> = bridge.workspaces.read().0.keys().cloned().collect();
    for name in names {
        let resolvable = bridge.providers_for(&name).map_or(0, |p| p.len());
        counts.insert(name, resolvable);
    }
    Json(json!({ "workspaces": counts }))
}

async fn get_stream(State(bridge): State<Arc<Bridge>>, Path(workspace): Path<String>) -> Response {
    if !bridge.accepting.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, "reload in progress").into_response();
    }

    let Some(providers) = bridge.providers_for(&workspace) else {
        return (StatusCode::NOT_FOUND, "unknown workspace").into_response();
    };

    if providers.is_empty() {
        return (StatusCode::NOT_FOUND, "workspace has no resolvable providers").into_response();
    }

    let router = Arc::new(Router::new(bridge.settings.request_timeout));
    if let Err(e) = router.connect(&providers).await {
        return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response();
    }

    let session_id = format!("sse-{}", Uuid::new_v4());
    let (tx, rx) = broadcast::channel(256);
    let session = Arc::new(BridgeSession {
        workspace: workspace.clone(),
        router,
        tx,
        pending: DashMap::new(),
    });
    bridge.sessions.insert(session_id.clone(), Arc::clone(&session));
    info!(session_id = %session_id, workspace = %workspace, "SSE session opened");

    let _ = session.tx.send(BridgeEvent::Lifecycle(json!({
        "jsonrpc": "2.0",
        "method": "streamOpened",
        "params": { "timestamp": unix_timestamp() }
    })));

    let keep_alive_interval = bridge.settings.sse_keep_alive_interval;
    let mut headers = HeaderMap::new();
    headers.insert(SESSION_ID_HEADER, session_id.parse().expect("session id is ASCII"));

    let stream = build_event_stream(rx, keep_alive_interval);
    let sse = Sse::new(stream).keep_alive(KeepAlive::new().interval(keep_alive_interval));
    (headers, sse).into_response()
}

/// Seconds since the Unix epoch, for lifecycle event timestamps.
fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

fn build_event_stream(
    mut rx: broadcast::Receiver<BridgeEvent>,
    ping_interval: std::time::Duration,
) -> impl Stream<Item = std::result::Result<Event, Infallible>> {
    stream! {
        let mut ticker = tokio::time::interval(ping_interval);
        ticker.tick().await; // first tick fires immediately, discard it

        loop {
            tokio::select! {
                biased;
                msg = rx.recv() => {
                    match msg {
                        Ok(BridgeEvent::Response(response)) => {
                            yield Ok(Event::default().event("response").data(serde_json::to_string(&response).unwrap_or_default()));
                        }
                        Ok(BridgeEvent::Lifecycle(value)) => {
                            let is_closed = value.get("method").and_then(Value::as_str) == Some("streamClosed");
                            yield Ok(Event::default().event("lifecycle").data(value.to_string()));
                            if is_closed {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(missed = n, "SSE session lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = ticker.tick() => {
                    let ping = json!({
                        "jsonrpc": "2.0",
                        "method": "ping",
                        "params": { "timestamp": unix_timestamp() }
                    });
                    yield Ok(Event::default().event("lifecycle").data(ping.to_string()));
                }
            }
        }
    }
}

async fn post_message(
    State(bridge): State<Arc<Bridge>>,
    Path(workspace): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let Some(session_id) = headers.get(SESSION_ID_HEADER).and_then(|v| v.to_str().ok()) else {
        return (StatusCode::BAD_REQUEST, "missing mcp-session-id header").into_response();
    };

    let Some(session) = bridge.sessions.get(session_id).map(|e| Arc::clone(e.value())) else {
        return (StatusCode::NOT_FOUND, "unknown or expired session").into_response();
    };

    if session.workspace != workspace {
        return (StatusCode::BAD_REQUEST, "session does not belong to this workspace").into_response();
    }

    let request: JsonRpcRequest = match serde_json::from_value(body) {
        Ok(req) => req,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    // A message with no id is a notification (e.g.
    // `notifications/initialized`): dispatch it for effect but never
    // correlate or emit a response event.
    let Some(id) = request.id.clone() else {
        debug!(method = %request.method, "received notification over POST, no response emitted");
        let router = Arc::clone(&session.router);
        tokio::spawn(async move {
            let _ = dispatch(&router, &request).await;
        });
        return StatusCode::ACCEPTED.into_response();
    };

    let id_key = id.to_string();
    session.pending.insert(id_key.clone(), ());

    tokio::spawn(async move {
        let result = dispatch(&session.router, &request).await;
        session.pending.remove(&id_key);
        let response = match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::error(Some(id), e.to_rpc_code(), e.to_string()),
        };
        let _ = session.tx.send(BridgeEvent::Response(response));
    });

    StatusCode::ACCEPTED.into_response()
}

fn initialize_result() -> InitializeResult {
    InitializeResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        capabilities: ServerCapabilities {
            logging: None,
            prompts: Some(PromptsCapability { list_changed: true }),
            tools: Some(ToolsCapability { list_changed: true }),
        },
        server_info: Info {
            name: "mcp-gateway".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: None,
            description: None,
        },
        instructions: None,
    }
}

async fn dispatch(router: &Arc<Router>, request: &JsonRpcRequest) -> crate::Result<Value> {
    match request.method.as_str() {
        "initialize" => Ok(serde_json::to_value(initialize_result())?),
        "tools/list" => Ok(serde_json::to_value(router.list_tools().await)?),
        "tools/call" => {
            let params = parse_params(request)?;
            Ok(serde_json::to_value(router.route_tool_call(params).await?)?)
        }
        "prompts/list" => Ok(serde_json::to_value(router.list_prompts().await)?),
        "prompts/get" => {
            let params = parse_params(request)?;
            Ok(serde_json::to_value(router.route_get_prompt(params).await?)?)
        }
        other => Err(crate::Error::InvalidParams(format!("unknown method {other:?}"))),
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(request: &JsonRpcRequest) -> crate::Result<T> {
    let value = request.params.clone().ok_or_else(|| crate::Error::InvalidParams("missing params".to_string()))?;
    serde_json::from_value(value).map_err(|e| crate::Error::InvalidParams(e.to_string()))
}

async fn close_session(session: &Arc<BridgeSession>, reason: &str) {
    for entry in session.pending.iter() {
        let id = entry.key().clone();
        let response = JsonRpcResponse::error(
            Some(parse_request_id(&id)),
            crate::error::rpc_codes::SERVER_ERROR_STREAM_CLOSED,
            "stream closed",
        );
        let _ = session.tx.send(BridgeEvent::Response(response));
    }
    session.pending.clear();

    let _ = session.tx.send(BridgeEvent::Lifecycle(json!({
        "jsonrpc": "2.0",
        "method": "streamClosed",
        "params": { "reason": reason }
    })));

    session.router.stop().await;
}

fn parse_request_id(raw: &str) -> RequestId {
    raw.parse::<i64>().map_or_else(|_| RequestId::String(raw.to_string()), RequestId::Number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_request_id_prefers_numeric() {
        assert!(matches!(parse_request_id("42"), RequestId::Number(42)));
        assert!(matches!(parse_request_id("abc"), RequestId::String(s) if s == "abc"));
    }

    #[tokio::test]
    async fn bridge_starts_accepting() {
        let bridge = Bridge::new(
            ProvidersSnapshot::default(),
            WorkspacesSnapshot::default(),
            GatewaySettings::default(),
        );
        assert!(bridge.accepting.load(Ordering::SeqCst));
        bridge.suspend();
        assert!(!bridge.accepting.load(Ordering::SeqCst));
        bridge.resume();
        assert!(bridge.accepting.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unknown_workspace_has_no_resolvable_providers() {
        let bridge = Bridge::new(
            ProvidersSnapshot::default(),
            WorkspacesSnapshot::default(),
            GatewaySettings::default(),
        );
        assert!(bridge.providers_for("missing").is_none());
    }

    #[tokio::test]
    async fn dispatch_handles_initialize() {
        let router = Arc::new(Router::new(std::time::Duration::from_secs(1)));
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(RequestId::Number(1)),
            method: "initialize".to_string(),
            params: None,
        };
        let value = dispatch(&router, &request).await.unwrap();
        assert_eq!(value["protocolVersion"], PROTOCOL_VERSION);
        assert!(value["capabilities"]["prompts"]["listChanged"].as_bool().unwrap());
    }

    #[tokio::test]
    async fn dispatch_rejects_unknown_method() {
        let router = Arc::new(Router::new(std::time::Duration::from_secs(1)));
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(RequestId::Number(1)),
            method: "bogus".to_string(),
            params: None,
        };
        assert!(dispatch(&router, &request).await.is_err());
    }
}
