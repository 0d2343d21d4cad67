//! Provider scanner: a short-lived, isolated connection used to
//! classify a single provider's capabilities (and defects) without
//! retaining any state. Used for workspace validation and diagnostics,
//! never by the router itself.

use serde_json::json;

use crate::config::{GatewaySettings, ProviderConfig};
use crate::protocol::{Prompt, ServerCapabilities, Tool};
use crate::transport::{self, Transport};
use crate::{Error, Result};

/// Outcome of scanning a single provider.
#[derive(Debug, Clone)]
pub enum ScanResult {
    /// The provider connected, completed the handshake, and (where its
    /// capabilities allowed) returned a tool/prompt listing.
    Success {
        /// Namespace the provider was scanned under
        namespace: String,
        /// Capabilities declared during `initialize`
        capabilities: ServerCapabilities,
        /// Tools advertised, if the provider declared the tools capability
        tools: Vec<Tool>,
        /// Prompts advertised, if the provider declared the prompts capability
        prompts: Vec<Prompt>,
    },
    /// The provider could not be connected to, or failed partway
    /// through the scan. Reasons accumulate; there is no partial
    /// success.
    Failure {
        /// Namespace the provider was scanned under
        namespace: String,
        /// Accumulated failure reasons, most specific last
        reasons: Vec<String>,
    },
}

/// Scan a single provider: connect, list tools/prompts per its
/// advertised capabilities, then disconnect. The connection is never
/// retained past the scan.
pub async fn scan(config: &ProviderConfig, settings: &GatewaySettings) -> ScanResult {
    let namespace = config.namespace().to_string();

    match tokio::time::timeout(settings.scan_deadline, scan_inner(config)).await {
        Ok(Ok((capabilities, tools, prompts))) => ScanResult::Success {
            namespace,
            capabilities,
            tools,
            prompts,
        },
        Ok(Err(reason)) => ScanResult::Failure {
            namespace,
            reasons: vec![reason],
        },
        Err(_) => ScanResult::Failure {
            namespace,
            reasons: vec![format!(
                "scan did not complete within {:?}",
                settings.scan_deadline
            )],
        },
    }
}

async fn scan_inner(config: &ProviderConfig) -> std::result::Result<(ServerCapabilities, Vec<Tool>, Vec<Prompt>), String> {
    let (transport, capabilities) = transport::connect(config).await.map_err(|e| e.to_string())?;

    let result = collect(&transport, &capabilities).await;
    let _ = transport.close().await;
    result.map(|(tools, prompts)| (capabilities, tools, prompts)).map_err(|e| e.to_string())
}

async fn collect(transport: &std::sync::Arc<dyn Transport>, capabilities: &ServerCapabilities) -> Result<(Vec<Tool>, Vec<Prompt>)> {
    let tools = if capabilities.tools.is_some() {
        list_tools(transport).await?
    } else {
        Vec::new()
    };

    let prompts = if capabilities.prompts.is_some() {
        list_prompts(transport).await?
    } else {
        Vec::new()
    };

    Ok((tools, prompts))
}

async fn list_tools(transport: &std::sync::Arc<dyn Transport>) -> Result<Vec<Tool>> {
    let response = transport.request("tools/list", Some(json!({}))).await?;
    if let Some(error) = response.error {
        return Err(Error::Upstream {
            code: error.code,
            message: error.message,
            data: error.data,
        });
    }
    let result = response.result.ok_or_else(|| Error::Transport("tools/list returned no result".into()))?;
    let tools: crate::protocol::ToolsListResult = serde_json::from_value(result)?;
    Ok(tools.tools)
}

async fn list_prompts(transport: &std::sync::Arc<dyn Transport>) -> Result<Vec<Prompt>> {
    let response = transport.request("prompts/list", Some(json!({}))).await?;
    if let Some(error) = response.error {
        return Err(Error::Upstream {
            code: error.code,
            message: error.message,
            data: error.data,
        });
    }
    let result = response.result.ok_or_else(|| Error::Transport("prompts/list returned no result".into()))?;
    let prompts: crate::protocol::PromptsListResult = serde_json::from_value(result)?;
    Ok(prompts.prompts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_result_success_carries_namespace() {
        let result = ScanResult::Success {
            namespace: "echo".to_string(),
            capabilities: ServerCapabilities::default(),
            tools: vec![],
            prompts: vec![],
        };
        match result {
            ScanResult::Success { namespace, .. } => assert_eq!(namespace, "echo"),
            ScanResult::Failure { .. } => panic!("expected success"),
        }
    }

    #[test]
    fn scan_result_failure_accumulates_reasons() {
        let result = ScanResult::Failure {
            namespace: "broken".to_string(),
            reasons: vec!["spawn failed".to_string()],
        };
        match result {
            ScanResult::Failure { reasons, .. } => assert_eq!(reasons.len(), 1),
            ScanResult::Success { .. } => panic!("expected failure"),
        }
    }
}
