//! Cooperative shutdown signalling between the process and the consumer loop.

use tokio::sync::watch;

#[cfg(test)]
#[path = "shutdown_tests.rs"]
mod tests;

/// Create a connected trigger and signal pair
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownTrigger { sender }, Shutdown { receiver })
}

/// Requests shutdown. Dropping the trigger without calling it never shuts down.
#[derive(Debug)]
pub struct ShutdownTrigger {
    sender: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Signal every connected `Shutdown`. Idempotent.
    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }
}

/// Observes a shutdown request; cheap to clone
#[derive(Debug, Clone)]
pub struct Shutdown {
    receiver: watch::Receiver<bool>,
}

impl Shutdown {
    /// A signal that is never triggered
    pub fn never() -> Self {
        let (_, shutdown) = channel();
        shutdown
    }

    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once shutdown has been requested
    pub async fn triggered(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                // Trigger dropped without firing
                std::future::pending::<()>().await;
            }
        }
    }
}
