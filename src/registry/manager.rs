//! Lease-backed registration of this process instance.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;

use crate::config::RegistryConfig;
use crate::observability::metrics;
use crate::registry::key::service_key;
use crate::registry::store::{CoordinationStore, Endpoint, LeaseId, RenewalStream, StoreError};

/// Time budgets for store calls.
#[derive(Debug, Clone, Copy)]
pub struct RegistrationTimeouts {
    /// Budget for each individual call made by `register`.
    pub request: Duration,
    /// Budget for the whole `unregister` sequence.
    pub unregister: Duration,
}

impl Default for RegistrationTimeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(1),
            unregister: Duration::from_secs(5),
        }
    }
}

impl From<&RegistryConfig> for RegistrationTimeouts {
    fn from(config: &RegistryConfig) -> Self {
        Self {
            request: config.request_timeout(),
            unregister: config.unregister_timeout(),
        }
    }
}

/// An active discovery entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub service_name: String,
    pub address: String,
    pub lease: LeaseId,
    pub ttl_secs: u64,
}

impl Registration {
    /// Discovery key: `<service_name>/<address>`.
    pub fn key(&self) -> String {
        service_key(&self.service_name, &self.address)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("lease ttl must be greater than 0")]
    InvalidTtl,
    #[error("address '{address}' is not a resolvable host:port: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("{0} is already registered")]
    AlreadyRegistered(String),
    #[error("lease grant failed: {0}")]
    Grant(#[source] StoreError),
    #[error("cannot create endpoint {key}: {source}")]
    Endpoint { key: String, source: StoreError },
    #[error("cannot start keepalive for {key}: {source}")]
    KeepAlive { key: String, source: StoreError },
}

/// The keepalive stream of an active registration ended without `unregister`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("registration {key} lost: keepalive for lease {lease} ended")]
pub struct RegistrationLost {
    pub key: String,
    pub lease: LeaseId,
}

/// One failed step of `unregister`.
#[derive(Debug, thiserror::Error)]
#[error("{step}: {source}")]
pub struct UnregisterFailure {
    pub step: &'static str,
    pub source: StoreError,
}

/// Every step of `unregister` that failed, joined.
#[derive(Debug, thiserror::Error)]
#[error("unregister of {key} incomplete: {}", join_failures(.failures))]
pub struct UnregistrationError {
    pub key: String,
    pub failures: Vec<UnregisterFailure>,
}

fn join_failures(failures: &[UnregisterFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Resolves if the registration is lost. Never resolves with a value once the
/// registration was removed on purpose.
#[derive(Debug)]
pub struct LeaseLoss {
    rx: oneshot::Receiver<RegistrationLost>,
}

impl LeaseLoss {
    /// `Some` when the keepalive stream ended on its own, `None` when the
    /// consumer was stopped by `unregister` or the manager was dropped.
    pub async fn wait(self) -> Option<RegistrationLost> {
        self.rx.await.ok()
    }
}

struct ActiveRegistration {
    registration: Registration,
    stop_keepalive: oneshot::Sender<()>,
    /// Set by the keepalive consumer once the lease is no longer renewed.
    lapsed: Arc<AtomicBool>,
}

impl ActiveRegistration {
    fn is_lapsed(&self) -> bool {
        self.lapsed.load(Ordering::SeqCst)
    }
}

/// Owns the discovery entry of this process.
///
/// All lease state lives behind one mutex; `register`, `unregister` and
/// `current` serialize on it and the keepalive consumer only owns a copy of
/// the immutable [`Registration`].
pub struct RegistrationManager {
    store: Arc<dyn CoordinationStore>,
    timeouts: RegistrationTimeouts,
    active: Mutex<Option<ActiveRegistration>>,
}

impl RegistrationManager {
    pub fn new(store: Arc<dyn CoordinationStore>, timeouts: RegistrationTimeouts) -> Self {
        Self {
            store,
            timeouts,
            active: Mutex::new(None),
        }
    }

    /// Grant a lease, publish `address` under `<service_name>/<address>` and
    /// start renewing the lease in the background.
    ///
    /// On failure nothing is left running. A lease that was granted but could
    /// not be attached is abandoned to expire on its own.
    pub async fn register(
        &self,
        service_name: &str,
        address: &str,
        ttl_secs: u64,
    ) -> Result<(Registration, LeaseLoss), RegistrationError> {
        if ttl_secs == 0 {
            return Err(RegistrationError::InvalidTtl);
        }

        let mut active = self.active.lock().await;
        if let Some(current) = active.as_ref() {
            if !current.is_lapsed() {
                return Err(RegistrationError::AlreadyRegistered(current.registration.key()));
            }
            tracing::debug!(key = %current.registration.key(), "Replacing lapsed registration");
        }

        self.check_address(address).await?;

        let key = service_key(service_name, address);
        let budget = self.timeouts.request;

        let lease = bounded("lease grant", budget, self.store.grant(ttl_secs))
            .await
            .map_err(|e| {
                metrics::record_registration("failed");
                RegistrationError::Grant(e)
            })?;

        let endpoint = Endpoint::new(address);
        if let Err(source) = bounded("endpoint put", budget, self.store.put_endpoint(&key, &endpoint, lease)).await {
            tracing::warn!(key = %key, lease = %lease, "Endpoint not created, leaving lease to expire");
            metrics::record_registration("failed");
            return Err(RegistrationError::Endpoint { key, source });
        }

        let renewals = match bounded("keepalive", budget, self.store.keep_alive(lease, ttl_secs)).await {
            Ok(renewals) => renewals,
            Err(source) => {
                if let Err(e) = bounded("endpoint delete", budget, self.store.delete_endpoint(&key)).await {
                    tracing::warn!(key = %key, error = %e, "Cannot withdraw endpoint after keepalive failure");
                }
                metrics::record_registration("failed");
                return Err(RegistrationError::KeepAlive { key, source });
            }
        };

        let registration = Registration {
            service_name: service_name.to_string(),
            address: address.to_string(),
            lease,
            ttl_secs,
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        let (lost_tx, lost_rx) = oneshot::channel();
        let lapsed = Arc::new(AtomicBool::new(false));
        tokio::spawn(consume_renewals(
            registration.clone(),
            renewals,
            stop_rx,
            lost_tx,
            lapsed.clone(),
        ));

        tracing::info!(key = %key, lease = %lease, ttl_secs, "Service registered");
        metrics::record_registration("ok");

        *active = Some(ActiveRegistration {
            registration: registration.clone(),
            stop_keepalive: stop_tx,
            lapsed,
        });

        Ok((registration, LeaseLoss { rx: lost_rx }))
    }

    /// Remove the discovery entry and revoke its lease.
    ///
    /// Does nothing when no registration is active, so calling it twice is
    /// safe. Delete and revoke are both attempted within one budget. A lapsed
    /// registration only gets a best-effort delete: its lease is no longer
    /// renewed and may already be gone from the store.
    pub async fn unregister(&self) -> Result<(), UnregistrationError> {
        let mut active = self.active.lock().await;
        let Some(current) = active.take() else {
            return Ok(());
        };

        let lapsed = current.is_lapsed();
        let _ = current.stop_keepalive.send(());

        let registration = current.registration;
        let key = registration.key();
        let deadline = Instant::now() + self.timeouts.unregister;

        if lapsed {
            if let Err(e) = until(deadline, "endpoint delete", self.store.delete_endpoint(&key)).await {
                tracing::debug!(key = %key, error = %e, "Lapsed endpoint not deleted, it expires with its lease");
            }
            tracing::info!(key = %key, lease = %registration.lease, "Lapsed registration cleared");
            metrics::record_unregistration("lapsed");
            return Ok(());
        }

        let (deleted, revoked) = tokio::join!(
            until(deadline, "endpoint delete", self.store.delete_endpoint(&key)),
            until(deadline, "lease revoke", self.store.revoke(registration.lease)),
        );

        let mut failures = Vec::new();
        if let Err(source) = deleted {
            failures.push(UnregisterFailure {
                step: "delete endpoint",
                source,
            });
        }
        if let Err(source) = revoked {
            failures.push(UnregisterFailure {
                step: "revoke lease",
                source,
            });
        }

        if failures.is_empty() {
            tracing::info!(key = %key, lease = %registration.lease, "Service unregistered");
            metrics::record_unregistration("ok");
            Ok(())
        } else {
            let err = UnregistrationError { key, failures };
            tracing::warn!(error = %err, "Unregister incomplete");
            metrics::record_unregistration("partial");
            Err(err)
        }
    }

    /// The active registration, if any. A lapsed registration is not active.
    pub async fn current(&self) -> Option<Registration> {
        self.active
            .lock()
            .await
            .as_ref()
            .filter(|active| !active.is_lapsed())
            .map(|active| active.registration.clone())
    }

    async fn check_address(&self, address: &str) -> Result<(), RegistrationError> {
        let invalid = |reason: String| RegistrationError::InvalidAddress {
            address: address.to_string(),
            reason,
        };

        match tokio::time::timeout(self.timeouts.request, tokio::net::lookup_host(address)).await {
            Ok(Ok(mut addrs)) => match addrs.next() {
                Some(_) => Ok(()),
                None => Err(invalid("resolved to no addresses".to_string())),
            },
            Ok(Err(e)) => Err(invalid(e.to_string())),
            Err(_) => Err(invalid("resolution timed out".to_string())),
        }
    }
}

/// Watch the renewal stream until stopped. An unrequested end of the stream
/// is reported through `lost`.
async fn consume_renewals(
    registration: Registration,
    mut renewals: RenewalStream,
    mut stop: oneshot::Receiver<()>,
    lost: oneshot::Sender<RegistrationLost>,
    lapsed: Arc<AtomicBool>,
) {
    let key = registration.key();
    loop {
        tokio::select! {
            biased;
            _ = &mut stop => {
                tracing::debug!(key = %key, "Keepalive consumer stopped");
                return;
            }
            renewal = renewals.recv() => match renewal {
                Some(renewal) => {
                    tracing::trace!(key = %key, lease = %renewal.lease, ttl_secs = renewal.ttl_secs, "Lease renewed");
                    metrics::record_lease_renewal();
                }
                None => {
                    tracing::error!(key = %key, lease = %registration.lease, "Keepalive stream ended, registration will lapse");
                    metrics::record_lease_lost();
                    lapsed.store(true, Ordering::SeqCst);
                    let _ = lost.send(RegistrationLost {
                        key,
                        lease: registration.lease,
                    });
                    return;
                }
            }
        }
    }
}

async fn bounded<T>(
    op: &'static str,
    budget: Duration,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(budget, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout { op, after: budget }),
    }
}

async fn until<T>(
    deadline: Instant,
    op: &'static str,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    let budget = deadline.saturating_duration_since(Instant::now());
    match tokio::time::timeout_at(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout { op, after: budget }),
    }
}
