//! Stdio transport: a locally spawned subprocess speaking JSON-RPC over
//! its stdin/stdout, newline-delimited.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, error, warn};

use super::Transport;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, RequestId};
use crate::{Error, Result};

/// Stdio transport for a subprocess MCP provider.
pub struct StdioTransport {
    /// Namespace this transport was connected under, for log attribution
    namespace: String,
    /// Child process
    child: Mutex<Option<Child>>,
    /// Pending requests waiting for a response
    pending: dashmap::DashMap<String, oneshot::Sender<JsonRpcResponse>>,
    /// Request ID counter
    request_id: AtomicU64,
    /// Connected flag
    connected: AtomicBool,
    /// Command to execute
    command: String,
    /// Arguments
    args: Vec<String>,
    /// Environment overlay (merged on top of the inherited environment)
    env: HashMap<String, String>,
    /// Writer handle
    writer: Mutex<Option<tokio::process::ChildStdin>>,
}

impl StdioTransport {
    /// Create a new, unstarted stdio transport.
    #[must_use]
    pub fn new(namespace: &str, command: &str, args: Vec<String>, env: HashMap<String, String>) -> Arc<Self> {
        Arc::new(Self {
            namespace: namespace.to_string(),
            child: Mutex::new(None),
            pending: dashmap::DashMap::new(),
            request_id: AtomicU64::new(1),
            connected: AtomicBool::new(false),
            command: command.to_string(),
            args,
            env,
            writer: Mutex::new(None),
        })
    }

    /// Spawn the subprocess and perform the MCP handshake.
    ///
    /// # Errors
    ///
    /// Returns `Error::ProviderConnect` if the process cannot be spawned
    /// or the handshake fails.
    pub async fn start(self: &Arc<Self>) -> Result<crate::protocol::ServerCapabilities> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| Error::ProviderConnect {
            namespace: self.namespace.clone(),
            reason: format!("spawn failed: {e}"),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| Error::ProviderConnect {
            namespace: self.namespace.clone(),
            reason: "failed to take child stdin".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| Error::ProviderConnect {
            namespace: self.namespace.clone(),
            reason: "failed to take child stdout".to_string(),
        })?;
        let stderr = child.stderr.take();

        *self.writer.lock().await = Some(stdin);
        *self.child.lock().await = Some(child);

        let transport = Arc::clone(self);
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            loop {
                match reader.next_line().await {
                    Ok(Some(line)) => {
                        if let Err(e) = transport.handle_response(&line) {
                            error!(namespace = %transport.namespace, error = %e, "failed to parse provider response");
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(namespace = %transport.namespace, error = %e, "error reading provider stdout");
                        break;
                    }
                }
            }
            transport.connected.store(false, Ordering::Relaxed);
        });

        // Provider stderr is a structured log source attributed to the
        // namespace; it is never forwarded to the MCP client.
        if let Some(stderr) = stderr {
            let namespace = self.namespace.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    warn!(target: "provider_log", namespace = %namespace, "{line}");
                }
            });
        }

        let capabilities = self.initialize().await?;

        Ok(capabilities)
    }

    async fn initialize(&self) -> Result<crate::protocol::ServerCapabilities> {
        let response = self
            .request(
                "initialize",
                Some(serde_json::json!({
                    "protocolVersion": PROTOCOL_VERSION,
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

        tokio::task::yield_now().await;
        self.notify("notifications/initialized", None).await?;
        tokio::task::yield_now().await;

        // Some providers continue async setup after the notification;
        // give them a moment before declaring the handshake complete.
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;

        self.connected.store(true, Ordering::Relaxed);
        debug!(namespace = %self.namespace, command = %self.command, "stdio provider connected");

        Ok(capabilities)
    }

    fn handle_response(&self, line: &str) -> Result<()> {
        let response: JsonRpcResponse = serde_json::from_str(line)?;
        if let Some(ref id) = response.id {
            let key = id.to_string();
            if let Some((_, sender)) = self.pending.remove(&key) {
                let _ = sender.send(response);
            }
        }
        Ok(())
    }

    async fn write_message(&self, message: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        if let Some(ref mut stdin) = *writer {
            stdin.write_all(message.as_bytes()).await.map_err(|e| Error::Transport(e.to_string()))?;
            stdin.write_all(b"\n").await.map_err(|e| Error::Transport(e.to_string()))?;
            stdin.flush().await.map_err(|e| Error::Transport(e.to_string()))?;
            drop(writer);
            tokio::task::yield_now().await;
            Ok(())
        } else {
            Err(Error::Transport("provider stdin is not connected".to_string()))
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    fn next_id(&self) -> RequestId {
        RequestId::Number(self.request_id.fetch_add(1, Ordering::Relaxed) as i64)
    }
}

#[async_trait]
impl Transport for StdioTransport {
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

        let message = serde_json::to_string(&request)?;
        if let Err(e) = self.write_message(&message).await {
            self.pending.remove(&id.to_string());
            return Err(e);
        }

        match rx.await {
            Ok(response) => Ok(response),
            Err(_) => Err(Error::Transport("provider closed the response channel".to_string())),
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params
        });
        let message = serde_json::to_string(&notification)?;
        self.write_message(&message).await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::Relaxed);
        *self.writer.lock().await = None;
        if let Some(ref mut child) = *self.child.lock().await {
            let _ = child.kill().await;
        }
        Ok(())
    }
}
