//! Reload supervisor: watches the provider and workspace snapshot
//! files and tears down active SSE sessions on a debounced change,
//! resuming once the new snapshot has been re-read.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::{GatewaySettings, ProvidersSnapshot, WorkspacesSnapshot};
use crate::gateway::Bridge;
use crate::Result;

/// Watches `providers_path` and `workspaces_path` for changes and
/// drives a [`Bridge`] through suspend/reload/resume cycles.
pub struct ReloadSupervisor {
    providers_path: PathBuf,
    workspaces_path: PathBuf,
    debounce: Duration,
}

impl ReloadSupervisor {
    /// Construct a supervisor over the two snapshot file paths.
    #[must_use]
    pub fn new(providers_path: PathBuf, workspaces_path: PathBuf, settings: &GatewaySettings) -> Self {
        Self {
            providers_path,
            workspaces_path,
            debounce: settings.reload_debounce,
        }
    }

    /// Run the watch loop until the process shuts down. Every detected
    /// change (debounced) suspends the bridge, closes all active
    /// sessions with reason `"reload"`, re-reads both snapshots, and
    /// resumes accepting connections.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the filesystem watcher cannot be
    /// installed (e.g. the snapshot directory does not exist).
    pub async fn run(&self, bridge: Arc<Bridge>) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<notify::Result<Event>>(16);

        let mut watcher: RecommendedWatcher = notify::recommended_watcher(move |res| {
            let _ = tx.blocking_send(res);
        })
        .map_err(|e| crate::Error::Config(format!("failed to install filesystem watcher: {e}")))?;

        for path in [&self.providers_path, &self.workspaces_path] {
            if let Some(parent) = path.parent() {
                watcher
                    .watch(parent, RecursiveMode::NonRecursive)
                    .map_err(|e| crate::Error::Config(format!("failed to watch {}: {e}", parent.display())))?;
            }
        }

        loop {
            let Some(event) = rx.recv().await else {
                break;
            };
            if let Err(e) = event {
                warn!(error = %e, "filesystem watch error");
                continue;
            }
            if !touches_snapshot(&event.unwrap(), &self.providers_path, &self.workspaces_path) {
                continue;
            }

            // Debounce: drain any further events that arrive within the window.
            tokio::time::sleep(self.debounce).await;
            while rx.try_recv().is_ok() {}

            self.fire(&bridge).await;
        }

        Ok(())
    }

    async fn fire(&self, bridge: &Arc<Bridge>) {
        info!("snapshot change detected, reloading");
        bridge.suspend();
        bridge.close_all("reload").await;

        match (ProvidersSnapshot::load(&self.providers_path), WorkspacesSnapshot::load(&self.workspaces_path)) {
            (Ok(providers), Ok(workspaces)) => {
                bridge.update_snapshots(providers, workspaces);
                bridge.resume();
                info!("reload complete, accepting new sessions");
            }
            (providers, workspaces) => {
                if let Err(e) = providers {
                    error!(error = %e, "reload failed to read providers snapshot");
                }
                if let Err(e) = workspaces {
                    error!(error = %e, "reload failed to read workspaces snapshot");
                }
                warn!("reload left the bridge suspended pending a valid snapshot");
            }
        }
    }
}

fn touches_snapshot(event: &Event, providers_path: &Path, workspaces_path: &Path) -> bool {
    event.paths.iter().any(|p| p == providers_path || p == workspaces_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touches_snapshot_matches_exact_paths() {
        let providers = PathBuf::from("/tmp/providers.yaml");
        let workspaces = PathBuf::from("/tmp/workspaces.yaml");
        let event = Event::new(notify::EventKind::Modify(notify::event::ModifyKind::Any))
            .add_path(providers.clone());
        assert!(touches_snapshot(&event, &providers, &workspaces));

        let unrelated = Event::new(notify::EventKind::Modify(notify::event::ModifyKind::Any))
            .add_path(PathBuf::from("/tmp/unrelated.txt"));
        assert!(!touches_snapshot(&unrelated, &providers, &workspaces));
    }
}
