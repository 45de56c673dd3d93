//! Signal handling for graceful shutdown and config reload.

use crate::config::ConfigLoader;
use pmdigest_core::config::{ConfigStore, TargetConfig};
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Notify;

/// Completes when a shutdown signal is received.
///
/// Listens for SIGTERM and SIGINT (Ctrl+C).
pub async fn shutdown_signal() -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
    }
    Ok(())
}

/// Spawns a task that listens for SIGHUP and reloads the targets.
///
/// Throttle, mail and bus settings keep their startup values. Returns a
/// Notify that stops the task.
pub fn spawn_config_reload_handler(
    config_loader: Arc<ConfigLoader>,
    target_store: ConfigStore<TargetConfig>,
) -> std::io::Result<Arc<Notify>> {
    let mut sighup = signal(SignalKind::hangup())?;
    let shutdown_notify = Arc::new(Notify::new());
    let shutdown_notify_clone = shutdown_notify.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    tracing::info!("Received SIGHUP, reloading configuration");
                    match config_loader.reload() {
                        Ok(loaded_config) => {
                            let version = target_store.update(loaded_config.targets);
                            tracing::info!(version, "Configuration reloaded successfully");
                        }
                        Err(e) => {
                            tracing::error!("Failed to reload configuration: {}", e);
                        }
                    }
                }
                _ = shutdown_notify_clone.notified() => {
                    tracing::debug!("Config reload handler shutting down");
                    break;
                }
            }
        }
    });

    Ok(shutdown_notify)
}
