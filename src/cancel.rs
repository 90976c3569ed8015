//! Cancellation tokens for suspend-capable operations
//!
//! Every long-running operation (stream relay, playback, capture) takes a
//! token and checks it at each suspension point. Cancelling is idempotent
//! and safe after the operation has already finished.

use tokio::sync::watch;

/// A clonable cancellation token.
///
/// All clones observe the same cancellation; `cancel` may be called any
/// number of times from any clone.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Signal cancellation. Idempotent; a no-op if already cancelled.
    pub fn cancel(&self) {
        // send_replace never fails: we hold a receiver ourselves.
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the token is cancelled. Returns immediately if it
    /// already was.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // wait_for cannot fail while self holds the sender.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
