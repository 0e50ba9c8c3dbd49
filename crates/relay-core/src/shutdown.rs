//! Cooperative shutdown signalling.
//!
//! A [`ShutdownTrigger`] flips a shared flag once; every cloned [`Shutdown`]
//! observes it, both by polling and by awaiting. Dropping every trigger
//! counts as a shutdown request.

use tokio::sync::watch;
use tracing::info;

/// Create a linked trigger/signal pair.
#[must_use]
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownTrigger { sender }, Shutdown { receiver })
}

/// Fires the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    sender: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        if !*self.sender.borrow() {
            info!("Shutdown requested");
        }
        self.sender.send_replace(true);
    }

    /// Get a new signal linked to this trigger.
    #[must_use]
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            receiver: self.sender.subscribe(),
        }
    }
}

/// Observes the shutdown signal.
#[derive(Debug, Clone)]
pub struct Shutdown {
    receiver: watch::Receiver<bool>,
}

impl Shutdown {
    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        // An error means every trigger is gone.
        *self.receiver.borrow() || self.receiver.has_changed().is_err()
    }

    /// Wait until shutdown is requested.
    pub async fn triggered(&mut self) {
        let _ = self.receiver.wait_for(|stop| *stop).await;
    }
}
