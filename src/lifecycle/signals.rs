//! OS signal handling.
//!
//! SIGINT and SIGTERM are the only signals handled. The watcher is an ordinary
//! member of the run group, so an operator's Ctrl-C races the other actors
//! like any other completion.

use async_trait::async_trait;

use crate::lifecycle::group::{Actor, ActorError};
use crate::lifecycle::shutdown::Shutdown;

/// Actor that returns when the process receives SIGINT or SIGTERM.
#[derive(Default)]
pub struct SignalWatcher {
    stop: Shutdown,
}

impl SignalWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(unix)]
    async fn wait_for_signal(&self) -> Result<(), ActorError> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt()).map_err(ActorError::Signal)?;
        let mut sigterm = signal(SignalKind::terminate()).map_err(ActorError::Signal)?;

        tokio::select! {
            _ = sigint.recv() => tracing::info!(signal = "SIGINT", "Shutdown signal received"),
            _ = sigterm.recv() => tracing::info!(signal = "SIGTERM", "Shutdown signal received"),
            _ = self.stop.wait() => tracing::debug!("Signal watcher interrupted"),
        }
        Ok(())
    }

    #[cfg(not(unix))]
    async fn wait_for_signal(&self) -> Result<(), ActorError> {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.map_err(ActorError::Signal)?;
                tracing::info!(signal = "ctrl-c", "Shutdown signal received");
            }
            _ = self.stop.wait() => tracing::debug!("Signal watcher interrupted"),
        }
        Ok(())
    }
}

#[async_trait]
impl Actor for SignalWatcher {
    fn name(&self) -> &str {
        "signals"
    }

    async fn execute(&self) -> Result<(), ActorError> {
        if self.stop.is_triggered() {
            return Ok(());
        }
        self.wait_for_signal().await
    }

    async fn interrupt(&self, _cause: Option<&ActorError>) {
        self.stop.trigger();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_interrupt_releases_execute() {
        let watcher = std::sync::Arc::new(SignalWatcher::new());
        let running = watcher.clone();
        let handle = tokio::spawn(async move { running.execute().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        watcher.interrupt(None).await;

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_interrupt_before_execute() {
        let watcher = SignalWatcher::new();
        watcher.interrupt(None).await;
        assert!(watcher.execute().await.is_ok());
    }
}
