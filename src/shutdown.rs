//! Graceful Shutdown Handling
//!
//! Turns SIGTERM/SIGINT (or Ctrl+C) into a shutdown signal that the relay
//! server observes through [`ShutdownCoordinator::subscribe`].

use tokio::sync::broadcast;
use tokio::signal;
use tracing::{debug, info};
use crate::Result;

/// Shutdown coordinator that manages graceful shutdown process
pub struct ShutdownCoordinator {
    /// Broadcast sender for shutdown signal
    shutdown_tx: broadcast::Sender<()>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self { shutdown_tx }
    }

    /// Get a shutdown receiver for components to listen for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Send the shutdown signal to every subscriber
    pub fn trigger(&self) {
        // No subscribers simply means nothing is left to stop
        if self.shutdown_tx.send(()).is_err() {
            debug!("Shutdown triggered with no subscribers");
        }
    }

    /// Wait for a shutdown signal and resolve once one is received (or the
    /// sender is gone)
    pub async fn signalled(mut receiver: broadcast::Receiver<()>) {
        let _ = receiver.recv().await;
    }

    /// Start listening for shutdown signals (SIGTERM, SIGINT)
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
                _ = signal::ctrl_c() => {
                    info!("Received Ctrl+C, initiating graceful shutdown");
                }
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        self.trigger();
        Ok(())
    }
}
