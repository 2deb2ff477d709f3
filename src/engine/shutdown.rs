//! Process-wide shutdown signal.
//!
//! One `Shutdown` is created per session; every job, the push subscriber
//! and the push consumer hold a `ShutdownListener`. Jobs check it between
//! iterations and never abort a step already in flight.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Signal every listener. Calling it more than once is harmless.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown has been signalled.
    pub async fn wait(&mut self) {
        // An error means the sender is gone, which can only happen once
        // the owning session has been dropped.
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}
