//! Gateway orchestrator: composes the router and stdio server into a
//! single workspace session, fixing startup/shutdown order and
//! handling SIGINT.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::config::{GatewaySettings, ProviderConfig};
use crate::gateway::server::GatewayServer;
use crate::router::Router;
use crate::{Error, Result};

/// Drives one workspace session over stdio: register handlers, connect
/// the router, attach the transport, then wait for SIGINT.
pub struct Orchestrator {
    router: Arc<Router>,
    server: Arc<GatewayServer>,
    shutdown_grace: Duration,
}

impl Orchestrator {
    /// Build an orchestrator from gateway settings.
    #[must_use]
    pub fn new(settings: &GatewaySettings) -> Self {
        let router = Arc::new(Router::new(settings.request_timeout));
        let server = Arc::new(GatewayServer::new(Arc::clone(&router)));
        Self {
            router,
            server,
            shutdown_grace: settings.shutdown_grace,
        }
    }

    /// Run one session to completion: startup, serve until shutdown,
    /// shutdown.
    ///
    /// # Errors
    ///
    /// Returns `Error::ProviderConnect` if every provider failed to
    /// connect, or `Error::Shutdown` if teardown exceeded its budget.
    pub async fn run(&self, providers: &[ProviderConfig]) -> Result<()> {
        // Fixed startup order: register handlers, then connect the
        // router, then attach the transport. No request handler may
        // observe stdin before connect() has returned.
        self.server.register_handlers()?;

        let failed = self.router.connect(providers).await?;
        for namespace in &failed {
            warn!(namespace = %namespace, "provider dropped from session, connect failed");
        }

        if let Err(e) = self.server.notify_logging_message("info", "gateway session started").await {
            warn!(error = %e, "failed to emit start notification");
        }

        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        tokio::select! {
            result = self.server.serve(tokio::io::stdin(), shutdown_tx.subscribe()) => {
                if let Err(e) = result {
                    error!(error = %e, "stdio server exited with error");
                }
            }
            () = wait_for_sigint() => {
                info!("received SIGINT, starting graceful shutdown");
                let _ = shutdown_tx.send(());
            }
        }

        self.shutdown().await
    }

    async fn shutdown(&self) -> Result<()> {
        let router = Arc::clone(&self.router);
        let server = Arc::clone(&self.server);

        let teardown = async {
            let (_, server_result) = tokio::join!(router.stop(), server.stop());
            server_result
        };

        let result = match tokio::time::timeout(self.shutdown_grace, teardown).await {
            Ok(server_result) => server_result,
            Err(_) => Err(Error::Shutdown(format!(
                "teardown did not complete within {:?}",
                self.shutdown_grace
            ))),
        };

        if let Err(e) = self.server.notify_logging_message("info", "gateway session stopped").await {
            warn!(error = %e, "failed to emit stop notification");
        }

        result
    }
}

/// Wait for a SIGINT; a second SIGINT within 2s forces an immediate
/// process exit with code 130 rather than returning.
async fn wait_for_sigint() {
    let _ = tokio::signal::ctrl_c().await;
    tokio::spawn(async {
        if tokio::time::timeout(Duration::from_secs(2), tokio::signal::ctrl_c()).await.is_ok() {
            std::process::exit(130);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_with_no_providers_returns_config_error() {
        // An empty workspace still calls connect([]) successfully (no
        // providers to fail), but serve() would then block on stdin
        // forever in a real run; this test only exercises registration
        // ordering, not the full stdio loop.
        let settings = GatewaySettings::default();
        let orchestrator = Orchestrator::new(&settings);
        orchestrator.server.register_handlers().unwrap();
        assert!(orchestrator.server.register_handlers().is_err());
    }
}
