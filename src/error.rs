//! Error types for the gateway

use std::io;

use thiserror::Error;

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors, one variant per error kind the router/server/bridge can
/// surface.
#[derive(Error, Debug)]
pub enum Error {
    /// Workspace not found, providers snapshot unreadable, or zero
    /// providers resolved. Surfaced before start; fatal.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport or handshake failure for a single provider. The provider
    /// is dropped from the session; the session continues if any other
    /// provider remains connected.
    #[error("provider connect failed for {namespace}: {reason}")]
    ProviderConnect {
        /// Namespace of the provider that failed to connect
        namespace: String,
        /// Human-readable reason
        reason: String,
    },

    /// Namespaced identifier malformed or namespace unknown at routing
    /// time.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// An MCP error surfaced verbatim from a connected provider.
    #[error("upstream error {code}: {message}")]
    Upstream {
        /// Upstream JSON-RPC error code
        code: i32,
        /// Upstream error message
        message: String,
        /// Upstream error data, if any
        data: Option<serde_json::Value>,
    },

    /// Per-request timeout expired.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Front-end write failure or upstream transport failure mid-request.
    #[error("transport error: {0}")]
    Transport(String),

    /// A resource failed to release within the shutdown budget.
    #[error("shutdown error: {0}")]
    Shutdown(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error (configuration snapshots)
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP error (SSE provider transport)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error not covered by a more specific kind
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build an `Upstream` error from a raw JSON-RPC error object.
    pub fn upstream(code: i32, message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self::Upstream {
            code,
            message: message.into(),
            data,
        }
    }

    /// Map this error to the JSON-RPC error code it should be surfaced as
    /// on the front-end wire.
    #[must_use]
    pub fn to_rpc_code(&self) -> i32 {
        match self {
            Self::Upstream { code, .. } => *code,
            Self::InvalidParams(_) => rpc_codes::INVALID_PARAMS,
            Self::Json(_) => rpc_codes::PARSE_ERROR,
            Self::Timeout(_) => rpc_codes::INTERNAL_ERROR,
            Self::Transport(_) => rpc_codes::SERVER_ERROR_STREAM_CLOSED,
            _ => rpc_codes::INTERNAL_ERROR,
        }
    }
}

/// Standard JSON-RPC error codes plus the gateway's own server-defined
/// range.
pub mod rpc_codes {
    /// Parse error - Invalid JSON
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request - Not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Gateway-defined: stream or session closed underneath an in-flight
    /// request.
    pub const SERVER_ERROR_STREAM_CLOSED: i32 = -32000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_params_maps_to_32602() {
        let err = Error::InvalidParams("unknown namespace zz".into());
        assert_eq!(err.to_rpc_code(), rpc_codes::INVALID_PARAMS);
    }

    #[test]
    fn upstream_preserves_original_code() {
        let err = Error::upstream(-32001, "tool not found", None);
        assert_eq!(err.to_rpc_code(), -32001);
    }

    #[test]
    fn transport_maps_to_stream_closed() {
        let err = Error::Transport("broken pipe".into());
        assert_eq!(err.to_rpc_code(), rpc_codes::SERVER_ERROR_STREAM_CLOSED);
    }
}
