//! MCP aggregating gateway binary.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use mcp_gateway::cli::{Cli, Mode};
use mcp_gateway::config::{GatewaySettings, ProvidersSnapshot, WorkspacesSnapshot};
use mcp_gateway::gateway::{Bridge, Orchestrator};
use mcp_gateway::reload::ReloadSupervisor;
use mcp_gateway::setup_tracing;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("failed to set up tracing: {e}");
        return ExitCode::FAILURE;
    }

    let settings = match GatewaySettings::load(cli.settings.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            error!("failed to load gateway settings: {e}");
            return ExitCode::from(1);
        }
    };

    let providers = match ProvidersSnapshot::load(&cli.providers) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!("failed to load providers snapshot: {e}");
            return ExitCode::from(1);
        }
    };

    let workspaces = match WorkspacesSnapshot::load(&cli.workspaces) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!("failed to load workspaces snapshot: {e}");
            return ExitCode::from(1);
        }
    };

    match cli.mode {
        Mode::Stdio { workspace } => run_stdio(&workspace, &providers, &workspaces, &settings).await,
        Mode::Sse { port } => {
            let mut settings = settings;
            if let Some(port) = port {
                settings.bind_port = port;
            }
            run_sse(providers, workspaces, settings, cli.providers, cli.workspaces).await
        }
    }
}

async fn run_stdio(
    workspace: &str,
    providers: &ProvidersSnapshot,
    workspaces: &WorkspacesSnapshot,
    settings: &GatewaySettings,
) -> ExitCode {
    let Some(namespaces) = workspaces.get(workspace) else {
        error!("workspace {workspace:?} not found in workspaces snapshot");
        return ExitCode::from(1);
    };

    let by_namespace = providers.by_namespace();
    let mut resolved = Vec::new();
    for name in namespaces {
        match by_namespace.get(name) {
            Some(config) => resolved.push(config.clone()),
            None => error!(workspace, namespace = %name, "provider namespace not found, excluding from session"),
        }
    }

    if resolved.is_empty() {
        error!(workspace, "no provider in this workspace resolved, nothing to serve");
        return ExitCode::from(1);
    }

    info!(workspace, providers = resolved.len(), "starting stdio session");

    let orchestrator = Orchestrator::new(settings);
    match orchestrator.run(&resolved).await {
        Ok(()) => {
            info!("session shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("session ended with error: {e}");
            ExitCode::from(2)
        }
    }
}

async fn run_sse(
    providers: ProvidersSnapshot,
    workspaces: WorkspacesSnapshot,
    settings: GatewaySettings,
    providers_path: std::path::PathBuf,
    workspaces_path: std::path::PathBuf,
) -> ExitCode {
    let bind_host = settings.bind_host.clone();
    let bind_port = settings.bind_port;

    let bridge = Bridge::new(providers, workspaces, settings.clone());
    let app = Arc::clone(&bridge).into_router();

    let addr = format!("{bind_host}:{bind_port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {addr}: {e}");
            return ExitCode::from(1);
        }
    };

    info!(addr, "SSE bridge listening");

    let reload_bridge = Arc::clone(&bridge);
    tokio::spawn(async move {
        let supervisor = ReloadSupervisor::new(providers_path, workspaces_path, &settings);
        if let Err(e) = supervisor.run(reload_bridge).await {
            error!("reload supervisor exited with error: {e}");
        }
    });

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("received SIGINT, shutting down SSE bridge");
    };

    match axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
        Ok(()) => {
            bridge.close_all("shutdown").await;
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("SSE bridge server error: {e}");
            ExitCode::from(2)
        }
    }
}
