//! Transport implementations for MCP providers

mod factory;
mod sse;
mod stdio;

pub use factory::connect;
pub use sse::SseTransport;
pub use stdio::StdioTransport;

use async_trait::async_trait;
use serde_json::Value;

use crate::{Result, protocol::JsonRpcResponse};

/// Transport trait for MCP communication with a single provider.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for the correlated response.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse>;

    /// Send a notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()>;

    /// Check if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Close the transport, releasing the underlying process or
    /// connection. Idempotent.
    async fn close(&self) -> Result<()>;
}
