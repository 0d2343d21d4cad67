//! SSE transport: a remote MCP provider using the legacy two-channel
//! SSE transport — a `GET` opens a long-lived event stream, whose first
//! event (`event: endpoint`) advertises a companion `POST` URL; every
//! subsequent `event: message` carries a JSON-RPC response or
//! notification. This is distinct from MCP's newer Streamable HTTP,
//! which multiplexes both directions over a single POST.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{Mutex, Notify, RwLock, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::Transport;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::{Error, Result};

/// How long to wait for the provider to advertise its message endpoint
/// after the SSE stream opens.
const ENDPOINT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// SSE transport for a remote MCP provider.
pub struct SseTransport {
    namespace: String,
    base_url: String,
    client: reqwest::Client,
    message_endpoint: RwLock<Option<String>>,
    endpoint_ready: Notify,
    pending: dashmap::DashMap<String, oneshot::Sender<JsonRpcResponse>>,
    request_id: AtomicU64,
    connected: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SseTransport {
    /// Create a new, unconnected SSE transport for `url`.
    #[must_use]
    pub fn new(namespace: &str, url: &str) -> Arc<Self> {
        Arc::new(Self {
            namespace: namespace.to_string(),
            base_url: url.to_string(),
            client: reqwest::Client::new(),
            message_endpoint: RwLock::new(None),
            endpoint_ready: Notify::new(),
            pending: dashmap::DashMap::new(),
            request_id: AtomicU64::new(1),
            connected: AtomicBool::new(false),
            reader: Mutex::new(None),
        })
    }

    /// Open the SSE stream, discover the companion POST endpoint, and
    /// perform the MCP handshake.
    ///
    /// # Errors
    ///
    /// Returns `Error::ProviderConnect` if the stream cannot be opened,
    /// the endpoint is never advertised, or the handshake fails.
    pub async fn start(self: &Arc<Self>) -> Result<crate::protocol::ServerCapabilities> {
        let response = self
            .client
            .get(&self.base_url)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| Error::ProviderConnect {
                namespace: self.namespace.clone(),
                reason: format!("GET {} failed: {e}", self.base_url),
            })?;

        if !response.status().is_success() {
            return Err(Error::ProviderConnect {
                namespace: self.namespace.clone(),
                reason: format!("GET {} returned {}", self.base_url, response.status()),
            });
        }

        let transport = Arc::clone(self);
        let handle = tokio::spawn(async move {
            transport.read_events(response).await;
        });
        *self.reader.lock().await = Some(handle);

        tokio::time::timeout(ENDPOINT_DISCOVERY_TIMEOUT, self.endpoint_ready.notified())
            .await
            .map_err(|_| Error::ProviderConnect {
                namespace: self.namespace.clone(),
                reason: "provider never advertised a message endpoint".to_string(),
            })?;

        let capabilities = self.initialize().await?;
        self.connected.store(true, Ordering::Relaxed);
        Ok(capabilities)
    }

    async fn read_events(self: Arc<Self>, response: reqwest::Response) {
        let mut stream = response.bytes_stream();
        let mut buf = String::new();

        while let Some(chunk) = stream.next().await {
            let Ok(bytes) = chunk else { break };
            buf.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(pos) = buf.find("\n\n") {
                let raw_event: String = buf.drain(..=pos + 1).collect();
                self.process_event(raw_event.trim()).await;
            }
        }

        self.connected.store(false, Ordering::Relaxed);
        debug!(namespace = %self.namespace, "SSE stream closed");
    }

    async fn process_event(&self, raw: &str) {
        let mut event_type: Option<&str> = None;
        let mut data = String::new();

        for line in raw.lines() {
            if let Some(rest) = line.strip_prefix("event:") {
                event_type = Some(rest.trim());
            } else if let Some(rest) = line.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(rest.trim());
            }
        }

        match event_type {
            Some("endpoint") => self.handle_endpoint_event(&data).await,
            _ => self.handle_message_event(&data),
        }
    }

    async fn handle_endpoint_event(&self, data: &str) {
        let endpoint = serde_json::from_str::<Value>(data)
            .ok()
            .and_then(|v| v.get("uri").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| data.trim_matches('"').to_string());

        let resolved = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint
        } else {
            match reqwest::Url::parse(&self.base_url).and_then(|base| base.join(&endpoint)) {
                Ok(url) => url.to_string(),
                Err(_) => endpoint,
            }
        };

        *self.message_endpoint.write().await = Some(resolved);
        self.endpoint_ready.notify_waiters();
    }

    fn handle_message_event(&self, data: &str) {
        if data.is_empty() {
            return;
        }
        let Ok(response) = serde_json::from_str::<JsonRpcResponse>(data) else {
            warn!(namespace = %self.namespace, "unparsable SSE message event");
            return;
        };

        if let Some(ref id) = response.id {
            if let Some((_, sender)) = self.pending.remove(&id.to_string()) {
                let _ = sender.send(response);
            }
        } else {
            debug!(namespace = %self.namespace, "provider notification (no id), forwarded to log sink");
        }
    }

    async fn initialize(&self) -> Result<crate::protocol::ServerCapabilities> {
        let response = self
            .request(
                "initialize",
                Some(serde_json::json!({
                    "protocolVersion": crate::protocol::PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "mcp-aggregator",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                })),
            )
            .await
            .map_err(|e| Error::ProviderConnect {
                namespace: self.namespace.clone(),
                reason: format!("initialize request failed: {e}"),
            })?;

        if response.error.is_some() {
            return Err(Error::ProviderConnect {
                namespace: self.namespace.clone(),
                reason: "initialize returned an error".to_string(),
            });
        }

        let capabilities = response
            .result
            .as_ref()
            .and_then(|r| r.get("capabilities"))
            .and_then(|c| serde_json::from_value(c.clone()).ok())
            .unwrap_or_default();

        self.notify("notifications/initialized", None).await?;
        Ok(capabilities)
    }

    #[allow(clippy::cast_possible_wrap)]
    fn next_id(&self) -> RequestId {
        RequestId::Number(self.request_id.fetch_add(1, Ordering::Relaxed) as i64)
    }

    async fn post(&self, body: Value) -> Result<()> {
        let endpoint = self
            .message_endpoint
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Transport("message endpoint not yet discovered".to_string()))?;

        self.client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?
            .error_for_status()
            .map_err(Error::from)?;
        Ok(())
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        let id = self.next_id();
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(id.clone()),
            method: method.to_string(),
            params,
        };

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.to_string(), tx);

        let body = serde_json::to_value(&request)?;
        if let Err(e) = self.post(body).await {
            self.pending.remove(&id.to_string());
            return Err(e);
        }

        rx.await.map_err(|_| Error::Transport("provider closed the response channel".to_string()))
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params
        });
        self.post(notification).await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::Relaxed);
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }
}
