//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// MCP aggregating gateway: presents a workspace of MCP providers as
/// one namespaced MCP server.
#[derive(Parser, Debug)]
#[command(name = "mcp-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the providers snapshot (YAML)
    #[arg(long, env = "MCP_GATEWAY_PROVIDERS", default_value = "providers.yaml")]
    pub providers: PathBuf,

    /// Path to the workspaces snapshot (YAML)
    #[arg(long, env = "MCP_GATEWAY_WORKSPACES", default_value = "workspaces.yaml")]
    pub workspaces: PathBuf,

    /// Path to gateway-local settings (YAML); optional
    #[arg(long, env = "MCP_GATEWAY_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "MCP_GATEWAY_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "MCP_GATEWAY_LOG_FORMAT")]
    pub log_format: Option<String>,

    #[command(subcommand)]
    pub mode: Mode,
}

/// The two front-ends the core exposes: a single stdio session bound
/// to one workspace, or an HTTP/SSE bridge serving any workspace in
/// the snapshot by path.
#[derive(Subcommand, Debug)]
pub enum Mode {
    /// Serve one workspace over stdio until SIGINT.
    Stdio {
        /// Workspace name to serve
        workspace: String,
    },
    /// Serve `GET`/`POST /mcp/:workspace` over HTTP until SIGINT.
    Sse {
        /// Port to bind; overrides the settings file's `bind_port`
        port: Option<u16>,
    },
}
