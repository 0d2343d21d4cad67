//! Provider transport factory: given a provider configuration, produce a
//! connected MCP client transport or fail with a classifiable error.
//! Ownership of the returned transport transfers to the caller — the
//! factory never retains it.

use std::sync::Arc;

use crate::Result;
use crate::config::ProviderConfig;
use crate::protocol::ServerCapabilities;

use super::{SseTransport, StdioTransport, Transport};

/// Spawn or connect the transport for `config` and return it, along with
/// the capabilities it advertised during the handshake, once the MCP
/// handshake has completed.
///
/// # Errors
///
/// Returns `Error::ProviderConnect` describing the failure: spawn
/// failure, connection refusal, handshake timeout, or a malformed
/// handshake response.
pub async fn connect(config: &ProviderConfig) -> Result<(Arc<dyn Transport>, ServerCapabilities)> {
    match config {
        ProviderConfig::Stdio {
            namespace,
            provider_parameters,
        } => {
            let transport = StdioTransport::new(
                namespace,
                &provider_parameters.command,
                provider_parameters.args.clone(),
                provider_parameters.env.clone(),
            );
            let capabilities = transport.start().await?;
            Ok((transport as Arc<dyn Transport>, capabilities))
        }
        ProviderConfig::Sse {
            namespace,
            provider_parameters,
        } => {
            let transport = SseTransport::new(namespace, &provider_parameters.url);
            let capabilities = transport.start().await?;
            Ok((transport as Arc<dyn Transport>, capabilities))
        }
    }
}
