//! Run-group: start actors together, stop them together.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::FutureExt;
use tokio::task::JoinSet;

use crate::observability::metrics;
use crate::registry::{RegistrationError, RegistrationLost};

/// Exit status for an orderly shutdown.
pub const EXIT_OK: u8 = 0;
/// Exit status when an actor failed while running.
pub const EXIT_FAILURE: u8 = 1;
/// Exit status when the process could not start serving.
pub const EXIT_STARTUP: u8 = 2;
/// Exit status when the discovery registration lapsed.
pub const EXIT_REGISTRATION_LOST: u8 = 3;

/// Why an actor's `execute` returned early.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    #[error("cannot bind {addr}: {source}")]
    Bind { addr: String, source: std::io::Error },
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    #[error(transparent)]
    RegistrationLost(#[from] RegistrationLost),
    #[error("rpc server failed: {0}")]
    Rpc(#[from] tonic::transport::Error),
    #[error("metrics server failed: {0}")]
    Metrics(#[source] std::io::Error),
    #[error("cannot install signal handler: {0}")]
    Signal(#[source] std::io::Error),
    #[error("actor {0} panicked")]
    Panicked(String),
    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl ActorError {
    pub fn other(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        ActorError::Other(err.into())
    }

    /// Failures that happen before the service starts serving.
    pub fn is_startup_fatal(&self) -> bool {
        matches!(self, ActorError::Bind { .. } | ActorError::Registration(_))
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            ActorError::RegistrationLost(_) => EXIT_REGISTRATION_LOST,
            e if e.is_startup_fatal() => EXIT_STARTUP,
            _ => EXIT_FAILURE,
        }
    }
}

/// A long-running unit managed by a [`RunGroup`].
///
/// `execute` runs until the work ends or `interrupt` asks it to stop.
/// `interrupt` may be called before, during or after `execute` and must
/// return without waiting indefinitely.
#[async_trait]
pub trait Actor: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &str;

    async fn execute(&self) -> Result<(), ActorError>;

    /// `cause` is the error of the actor that finished first, if any.
    async fn interrupt(&self, cause: Option<&ActorError>);
}

#[async_trait]
impl<A: Actor + ?Sized> Actor for Arc<A> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn execute(&self) -> Result<(), ActorError> {
        (**self).execute().await
    }

    async fn interrupt(&self, cause: Option<&ActorError>) {
        (**self).interrupt(cause).await
    }
}

/// An ordered set of actors run as one unit.
#[derive(Default)]
pub struct RunGroup {
    actors: Vec<Arc<dyn Actor>>,
}

impl RunGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<A: Actor + 'static>(&mut self, actor: A) -> &mut Self {
        self.actors.push(Arc::new(actor));
        self
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    /// Run every actor concurrently until the first one returns.
    ///
    /// Every actor is then interrupted exactly once with the first result's
    /// error, all remaining `execute` calls are awaited, and the first result
    /// is returned. Later results are discarded.
    pub async fn run(self) -> Result<(), ActorError> {
        if self.actors.is_empty() {
            return Ok(());
        }

        let mut running = JoinSet::new();
        for (index, actor) in self.actors.iter().enumerate() {
            let actor = Arc::clone(actor);
            running.spawn(async move {
                let result = AssertUnwindSafe(actor.execute())
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(ActorError::Panicked(actor.name().to_string())));
                (Some(index), result)
            });
        }
        tracing::info!(actors = self.actors.len(), "Run group started");

        let Some(joined) = running.join_next().await else {
            return Ok(());
        };
        let (index, first) = joined.unwrap_or_else(|e| (None, Err(ActorError::other(e))));
        let first_name = index.map_or("unknown", |i| self.actors[i].name());
        record_exit(first_name, &first);

        match &first {
            Ok(()) => tracing::info!(actor = first_name, "Actor finished, stopping group"),
            Err(e) => tracing::error!(actor = first_name, error = %e, "Actor failed, stopping group"),
        }

        let cause = first.as_ref().err();
        join_all(self.actors.iter().map(|actor| async move {
            let outcome = AssertUnwindSafe(actor.interrupt(cause)).catch_unwind().await;
            if outcome.is_err() {
                tracing::error!(actor = actor.name(), "Actor panicked while being interrupted");
            }
        }))
        .await;

        while let Some(joined) = running.join_next().await {
            if let Ok((Some(index), result)) = joined {
                let name = self.actors[index].name();
                record_exit(name, &result);
                if let Err(e) = result {
                    tracing::debug!(actor = name, error = %e, "Discarding later actor error");
                }
            }
        }

        tracing::info!("Run group stopped");
        first
    }
}

fn record_exit(actor: &str, result: &Result<(), ActorError>) {
    let outcome = if result.is_ok() { "ok" } else { "error" };
    metrics::record_actor_exit(actor, outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Blocking {
        stop: Shutdown,
        interrupts: AtomicUsize,
    }

    #[async_trait]
    impl Actor for Blocking {
        fn name(&self) -> &str {
            "blocking"
        }

        async fn execute(&self) -> Result<(), ActorError> {
            self.stop.wait().await;
            Ok(())
        }

        async fn interrupt(&self, _cause: Option<&ActorError>) {
            self.interrupts.fetch_add(1, Ordering::SeqCst);
            self.stop.trigger();
        }
    }

    struct Panicking;

    #[async_trait]
    impl Actor for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn execute(&self) -> Result<(), ActorError> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            panic!("boom");
        }

        async fn interrupt(&self, _cause: Option<&ActorError>) {}
    }

    #[tokio::test]
    async fn test_empty_group_returns_ok() {
        assert!(RunGroup::new().run().await.is_ok());
    }

    #[tokio::test]
    async fn test_panicking_actor_stops_group() {
        let blocking = Arc::new(Blocking {
            stop: Shutdown::new(),
            interrupts: AtomicUsize::new(0),
        });
        let mut group = RunGroup::new();
        group.add(blocking.clone()).add(Panicking);

        let err = tokio::time::timeout(Duration::from_secs(5), group.run())
            .await
            .unwrap()
            .unwrap_err();

        assert!(matches!(err, ActorError::Panicked(ref name) if name == "panicking"));
        assert_eq!(blocking.interrupts.load(Ordering::SeqCst), 1);
    }

    struct PanicsOnInterrupt {
        stop: Shutdown,
    }

    #[async_trait]
    impl Actor for PanicsOnInterrupt {
        fn name(&self) -> &str {
            "panics-on-interrupt"
        }

        async fn execute(&self) -> Result<(), ActorError> {
            self.stop.wait().await;
            Ok(())
        }

        async fn interrupt(&self, _cause: Option<&ActorError>) {
            self.stop.trigger();
            panic!("interrupt failed");
        }
    }

    struct Failing;

    #[async_trait]
    impl Actor for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn execute(&self) -> Result<(), ActorError> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(ActorError::other("first"))
        }

        async fn interrupt(&self, _cause: Option<&ActorError>) {}
    }

    #[tokio::test]
    async fn test_panicking_interrupt_does_not_escape_run() {
        let blocking = Arc::new(Blocking {
            stop: Shutdown::new(),
            interrupts: AtomicUsize::new(0),
        });
        let mut group = RunGroup::new();
        group
            .add(PanicsOnInterrupt { stop: Shutdown::new() })
            .add(blocking.clone())
            .add(Failing);

        let err = tokio::time::timeout(Duration::from_secs(5), group.run())
            .await
            .unwrap()
            .unwrap_err();

        assert_eq!(err.to_string(), "first");
        assert_eq!(blocking.interrupts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exit_codes() {
        let bind = ActorError::Bind {
            addr: "0.0.0.0:1".into(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert!(bind.is_startup_fatal());
        assert_eq!(bind.exit_code(), EXIT_STARTUP);

        let registration = ActorError::from(RegistrationError::InvalidTtl);
        assert_eq!(registration.exit_code(), EXIT_STARTUP);

        let lost = ActorError::from(RegistrationLost {
            key: "svc/127.0.0.1:1".into(),
            lease: crate::registry::LeaseId(7),
        });
        assert_eq!(lost.exit_code(), EXIT_REGISTRATION_LOST);

        assert_eq!(ActorError::other("boom").exit_code(), EXIT_FAILURE);
        assert_eq!(ActorError::Panicked("x".into()).exit_code(), EXIT_FAILURE);
    }
}
