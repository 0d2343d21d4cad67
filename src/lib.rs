//! MCP Gateway Library
//!
//! An aggregating gateway for the Model Context Protocol. A workspace
//! bundles named providers (stdio subprocess or remote SSE); the
//! gateway presents their union of tools and prompts as one outward
//! MCP server, namespaced by provider.
//!
//! # Front-ends
//!
//! - **stdio**: one workspace session bound to process stdin/stdout.
//! - **SSE bridge**: `GET`/`POST /mcp/:workspace` over HTTP, one router
//!   session per open connection, with hot-reload on snapshot changes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod namespace;
pub mod protocol;
pub mod reload;
pub mod router;
pub mod scanner;
pub mod transport;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// MCP Protocol version supported by this gateway
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
