//! Shutdown triggers for actors.

use std::sync::Arc;

use tokio::sync::watch;

/// A latched, cloneable trigger.
///
/// Once triggered it stays triggered, so a task that starts waiting after
/// the trigger still observes it.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the trigger. Repeated calls are no-ops.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the trigger fires.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            let triggered = *rx.borrow_and_update();
            if triggered {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
