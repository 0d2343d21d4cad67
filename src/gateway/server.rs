//! Gateway server (stdio front-end): an MCP server bound to process
//! stdin/stdout whose tool and prompt handlers delegate to a [`Router`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, error, info, warn};

use crate::protocol::{
    Info, InitializeResult, JsonRpcRequest, JsonRpcResponse, PromptsCapability, PromptsGetParams, PromptsListParams,
    ServerCapabilities, ToolsCallParams, ToolsCapability, ToolsListParams, PROTOCOL_VERSION,
};
use crate::router::Router;
use crate::{Error, Result};

/// MCP server bound to process stdio. Registers its capability set and
/// handler table once, then serves requests by delegating to the
/// router until a shutdown signal fires.
pub struct GatewayServer {
    router: Arc<Router>,
    handlers_registered: AtomicBool,
    writer: Mutex<Stdout>,
}

impl GatewayServer {
    /// Construct a server bound to this process's stdio, dispatching to `router`.
    #[must_use]
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            router,
            handlers_registered: AtomicBool::new(false),
            writer: Mutex::new(tokio::io::stdout()),
        }
    }

    /// Register the handler table. Must be called exactly once, before
    /// [`GatewayServer::serve`] attaches the transport.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if handlers were already registered.
    pub fn register_handlers(&self) -> Result<()> {
        if self.handlers_registered.swap(true, Ordering::SeqCst) {
            return Err(Error::Internal("handlers already registered".to_string()));
        }
        debug!("registered tools/prompts handler table");
        Ok(())
    }

    /// Serve requests from stdin until EOF or `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if handlers were never registered.
    pub async fn serve(&self, stdin: Stdin, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        if !self.handlers_registered.load(Ordering::SeqCst) {
            return Err(Error::Internal("serve called before register_handlers".to_string()));
        }

        let mut lines = BufReader::new(stdin).lines();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    debug!("stdio server received shutdown signal");
                    break;
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            if let Some(response) = self.handle_line(&line).await {
                                self.write_message(&response).await?;
                            }
                        }
                        Ok(None) => {
                            debug!("stdin closed");
                            break;
                        }
                        Err(e) => {
                            error!(error = %e, "error reading stdin");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "received malformed JSON-RPC request");
                return Some(JsonRpcResponse::error(None, crate::error::rpc_codes::PARSE_ERROR, e.to_string()));
            }
        };

        // A message with no id is a notification (e.g.
        // `notifications/initialized`): JSON-RPC forbids replying to one.
        let Some(id) = request.id.clone() else {
            debug!(method = %request.method, "received notification, no response emitted");
            return None;
        };

        let result = self.dispatch(&request).await;

        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => match e {
                Error::Upstream { code, message, data } => data.map_or_else(
                    || JsonRpcResponse::error(Some(id.clone()), code, message.clone()),
                    |data| JsonRpcResponse::error_with_data(Some(id.clone()), code, message, data),
                ),
                other => JsonRpcResponse::error(Some(id), other.to_rpc_code(), other.to_string()),
            },
        })
    }

    async fn dispatch(&self, request: &JsonRpcRequest) -> Result<serde_json::Value> {
        match request.method.as_str() {
            "initialize" => Ok(serde_json::to_value(self.initialize_result())?),
            "tools/list" => {
                let _params: ToolsListParams = parse_params(request)?;
                Ok(serde_json::to_value(self.router.list_tools().await)?)
            }
            "tools/call" => {
                let params: ToolsCallParams = parse_params(request)?;
                Ok(serde_json::to_value(self.router.route_tool_call(params).await?)?)
            }
            "prompts/list" => {
                let _params: PromptsListParams = parse_params(request)?;
                Ok(serde_json::to_value(self.router.list_prompts().await)?)
            }
            "prompts/get" => {
                let params: PromptsGetParams = parse_params(request)?;
                Ok(serde_json::to_value(self.router.route_get_prompt(params).await?)?)
            }
            other => Err(Error::InvalidParams(format!("unknown method {other:?}"))),
        }
    }

    fn initialize_result(&self) -> InitializeResult {
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

    /// Emit an MCP `notifications/message` logging notification to the
    /// connected client.
    pub async fn notify_logging_message(&self, level: &str, message: &str) -> Result<()> {
        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/message",
            "params": { "level": level, "data": message }
        });
        self.write_raw(&notification).await
    }

    async fn write_message(&self, response: &JsonRpcResponse) -> Result<()> {
        self.write_raw(response).await
    }

    async fn write_raw(&self, value: &impl serde::Serialize) -> Result<()> {
        let mut line = serde_json::to_string(value)?;
        line.push('\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await.map_err(|e| Error::Transport(e.to_string()))?;
        writer.flush().await.map_err(|e| Error::Transport(e.to_string()))?;
        Ok(())
    }

    /// Close the server: flush any pending writes. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.flush().await.map_err(|e| Error::Shutdown(e.to_string()))?;
        info!("stdio server stopped");
        Ok(())
    }
}

fn parse_params<T: serde::de::DeserializeOwned + Default>(request: &JsonRpcRequest) -> Result<T> {
    match &request.params {
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| Error::InvalidParams(e.to_string())),
        None => Ok(T::default()),
    }
}
