//! Signal handling for graceful shutdown
//!
//! The main loop selects on `wait`; whichever signal arrives first wins
//! and the caller runs cleanup (cancelling any open backend session)
//! before exiting.

use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

/// Waits for SIGTERM or SIGINT.
pub struct ShutdownSignal;

impl ShutdownSignal {
    pub fn new() -> Self {
        Self
    }

    /// Resolve on the first shutdown signal.
    pub async fn wait(&self) {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        let mut sigint =
            signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("received SIGINT");
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
