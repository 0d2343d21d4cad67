//! Gateway router: owns the live `namespace -> provider` connection
//! table and dispatches aggregated `tools/list`, `prompts/list`,
//! `tools/call`, and `prompts/get` requests across it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::ProviderConfig;
use crate::namespace;
use crate::protocol::{
    JsonRpcResponse, Prompt, PromptsGetParams, PromptsGetResult, PromptsListResult, RequestId, ServerCapabilities, Tool,
    ToolsCallParams, ToolsCallResult, ToolsListResult,
};
use crate::transport::{self, Transport};
use crate::{Error, Result};

/// A connected provider: its transport handle plus the capabilities it
/// declared during the handshake, which gate whether the router asks
/// it for tools or prompts at all.
struct ProviderClient {
    transport: Arc<dyn Transport>,
    capabilities: ServerCapabilities,
}

/// Routes aggregated requests across every connected provider in a
/// workspace, namespacing each provider's tools and prompts so callers
/// can address them unambiguously.
pub struct Router {
    providers: RwLock<HashMap<String, ProviderClient>>,
    request_timeout: Duration,
}

impl Router {
    /// Create an empty router with the given per-request timeout.
    #[must_use]
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            request_timeout,
        }
    }

    /// Connect to every provider concurrently. A provider whose
    /// connection or handshake fails is logged and dropped; it does not
    /// abort the others. Returns the namespaces that failed to connect,
    /// if any. It is not an error for some providers to fail, only for
    /// all of them to.
    ///
    /// # Errors
    ///
    /// Returns `Error::ProviderConnect` if every provider in `providers`
    /// failed to connect (an empty workspace is a configuration error,
    /// not a runtime one; the caller validates that before calling).
    pub async fn connect(&self, providers: &[ProviderConfig]) -> Result<Vec<String>> {
        let attempts = providers.iter().map(|config| async move {
            let namespace = config.namespace().to_string();
            match transport::connect(config).await {
                Ok((transport, capabilities)) => Ok((namespace, transport, capabilities)),
                Err(e) => Err((namespace, e)),
            }
        });

        let results = futures::future::join_all(attempts).await;

        let mut connected = HashMap::new();
        let mut failed = Vec::new();

        for result in results {
            match result {
                Ok((namespace, transport, capabilities)) => {
                    info!(namespace = %namespace, "provider connected");
                    connected.insert(namespace, ProviderClient { transport, capabilities });
                }
                Err((namespace, e)) => {
                    warn!(namespace = %namespace, error = %e, "provider failed to connect, dropping from workspace");
                    failed.push(namespace);
                }
            }
        }

        if connected.is_empty() && !providers.is_empty() {
            return Err(Error::ProviderConnect {
                namespace: "*".to_string(),
                reason: "no provider in the workspace connected successfully".to_string(),
            });
        }

        *self.providers.write().await = connected;
        Ok(failed)
    }

    /// Aggregate `tools/list` across every connected provider that
    /// advertises the tools capability. Failures from an individual
    /// provider's listing are logged and that provider's tools are
    /// omitted; the aggregate call never fails outright.
    pub async fn list_tools(&self) -> ToolsListResult {
        let providers = self.providers.read().await;
        let mut tools = Vec::new();

        for (namespace, client) in providers.iter() {
            if client.capabilities.tools.is_none() {
                continue;
            }
            match client.transport.request("tools/list", Some(json!({}))).await {
                Ok(response) if response.error.is_none() => {
                    if let Some(result) = response.result {
                        match serde_json::from_value::<ToolsListResult>(result) {
                            Ok(listing) => {
                                for mut tool in listing.tools {
                                    tool.name = namespace::join(namespace, &tool.name);
                                    tools.push(tool);
                                }
                            }
                            Err(e) => warn!(namespace = %namespace, error = %e, "malformed tools/list result, skipping"),
                        }
                    }
                }
                Ok(response) => {
                    warn!(namespace = %namespace, error = ?response.error, "provider tools/list returned an error, skipping");
                }
                Err(e) => {
                    warn!(namespace = %namespace, error = %e, "provider tools/list request failed, skipping");
                }
            }
        }

        ToolsListResult { tools, next_cursor: None }
    }

    /// Aggregate `prompts/list` across every connected provider that
    /// advertises the prompts capability, with the same best-effort
    /// semantics as [`Router::list_tools`].
    pub async fn list_prompts(&self) -> PromptsListResult {
        let providers = self.providers.read().await;
        let mut prompts: Vec<Prompt> = Vec::new();

        for (namespace, client) in providers.iter() {
            if client.capabilities.prompts.is_none() {
                continue;
            }
            match client.transport.request("prompts/list", Some(json!({}))).await {
                Ok(response) if response.error.is_none() => {
                    if let Some(result) = response.result {
                        match serde_json::from_value::<PromptsListResult>(result) {
                            Ok(listing) => {
                                for mut prompt in listing.prompts {
                                    prompt.name = namespace::join(namespace, &prompt.name);
                                    prompts.push(prompt);
                                }
                            }
                            Err(e) => warn!(namespace = %namespace, error = %e, "malformed prompts/list result, skipping"),
                        }
                    }
                }
                Ok(response) => {
                    warn!(namespace = %namespace, error = ?response.error, "provider prompts/list returned an error, skipping");
                }
                Err(e) => {
                    warn!(namespace = %namespace, error = %e, "provider prompts/list request failed, skipping");
                }
            }
        }

        PromptsListResult { prompts, next_cursor: None }
    }

    /// Route a `tools/call` to the provider named by the request's
    /// namespaced tool name.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidParams` if the name is not namespaced or
    /// names an unconnected provider, `Error::Timeout` if the provider
    /// does not respond within the configured request timeout, and
    /// propagates the provider's own error verbatim otherwise.
    pub async fn route_tool_call(&self, params: ToolsCallParams) -> Result<ToolsCallResult> {
        let (namespace, inner_name) = self.split_or_invalid(&params.name)?;
        let client = self.client_for(&namespace).await?;

        let inner_params = ToolsCallParams {
            name: inner_name,
            arguments: params.arguments,
        };

        let response = self
            .dispatch(&client, "tools/call", Some(serde_json::to_value(&inner_params)?))
            .await?;

        to_result(response)
    }

    /// Route a `prompts/get` to the provider named by the request's
    /// namespaced prompt name. Error semantics mirror
    /// [`Router::route_tool_call`].
    pub async fn route_get_prompt(&self, params: PromptsGetParams) -> Result<PromptsGetResult> {
        let (namespace, inner_name) = self.split_or_invalid(&params.name)?;
        let client = self.client_for(&namespace).await?;

        let inner_params = PromptsGetParams {
            name: inner_name,
            arguments: params.arguments,
        };

        let response = self
            .dispatch(&client, "prompts/get", Some(serde_json::to_value(&inner_params)?))
            .await?;

        to_result(response)
    }

    /// Stop every connected provider concurrently and clear the
    /// connection table. Idempotent.
    pub async fn stop(&self) {
        let mut providers = self.providers.write().await;
        let closes = providers.values().map(|client| client.transport.close());
        futures::future::join_all(closes).await;
        providers.clear();
    }

    fn split_or_invalid(&self, name: &str) -> Result<(String, String)> {
        namespace::split(name)
            .map(|(ns, inner)| (ns.to_string(), inner.to_string()))
            .ok_or_else(|| Error::InvalidParams(format!("{name:?} is not a namespaced tool/prompt name")))
    }

    async fn client_for(&self, namespace: &str) -> Result<Arc<dyn Transport>> {
        let providers = self.providers.read().await;
        providers
            .get(namespace)
            .map(|client| Arc::clone(&client.transport))
            .ok_or_else(|| Error::InvalidParams(format!("no provider connected for namespace {namespace:?}")))
    }

    async fn dispatch(&self, transport: &Arc<dyn Transport>, method: &str, params: Option<serde_json::Value>) -> Result<JsonRpcResponse> {
        match tokio::time::timeout(self.request_timeout, transport.request(method, params)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!("{method} did not complete within {:?}", self.request_timeout))),
        }
    }
}

fn to_result<T: serde::de::DeserializeOwned>(response: JsonRpcResponse) -> Result<T> {
    if let Some(error) = response.error {
        return Err(Error::Upstream {
            code: error.code,
            message: error.message,
            data: error.data,
        });
    }
    let result = response.result.ok_or_else(|| Error::Transport("provider response had neither result nor error".into()))?;
    Ok(serde_json::from_value(result)?)
}

/// Build a JSON-RPC `-32603` error response for a router-level timeout,
/// matching the shape handlers forward to the client.
#[must_use]
pub fn timeout_response(id: Option<RequestId>, method: &str) -> JsonRpcResponse {
    JsonRpcResponse::error(id, crate::error::rpc_codes::INTERNAL_ERROR, format!("{method} timed out"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_response_uses_internal_error_code() {
        let response = timeout_response(Some(RequestId::Number(1)), "tools/call");
        assert_eq!(response.error.unwrap().code, -32603);
    }

    #[tokio::test]
    async fn empty_workspace_connect_is_a_noop() {
        let router = Router::new(Duration::from_secs(1));
        let failed = router.connect(&[]).await.unwrap();
        assert!(failed.is_empty());
    }

    #[tokio::test]
    async fn tool_call_with_unnamespaced_name_is_rejected() {
        let router = Router::new(Duration::from_secs(1));
        let err = router
            .route_tool_call(ToolsCallParams {
                name: "noprefix".to_string(),
                arguments: serde_json::json!({}),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
    }

    #[tokio::test]
    async fn tool_call_for_unknown_namespace_is_rejected() {
        let router = Router::new(Duration::from_secs(1));
        let err = router
            .route_tool_call(ToolsCallParams {
                name: "echo_say".to_string(),
                arguments: serde_json::json!({}),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
    }

    #[tokio::test]
    async fn list_tools_on_empty_router_is_empty() {
        let router = Router::new(Duration::from_secs(1));
        let result = router.list_tools().await;
        assert!(result.tools.is_empty());
    }

    #[tokio::test]
    async fn stop_on_empty_router_is_a_noop() {
        let router = Router::new(Duration::from_secs(1));
        router.stop().await;
    }
}
