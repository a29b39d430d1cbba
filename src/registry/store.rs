//! Coordination store contract.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Opaque lease handle issued by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseId(pub i64);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Acknowledgement that the store refreshed a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseRenewal {
    pub lease: LeaseId,
    /// Remaining time-to-live reported by the store, in seconds.
    pub ttl_secs: u64,
}

/// Stream of renewal acks. It ends (the sender is dropped) when the store
/// stops renewing the lease for any reason.
pub type RenewalStream = mpsc::Receiver<LeaseRenewal>;

/// Value stored under a discovery key.
///
/// Field names follow the etcd naming endpoint format so gRPC resolvers can
/// read the entries directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(rename = "Addr")]
    pub addr: String,
    #[serde(rename = "Metadata", default)]
    pub metadata: Option<serde_json::Value>,
}

impl Endpoint {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            metadata: None,
        }
    }
}

/// Errors returned by coordination store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },
    #[error("lease {0} not found")]
    LeaseNotFound(LeaseId),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("cannot encode endpoint: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("etcd: {0}")]
    Etcd(#[from] etcd_client::Error),
}

/// Operations the registration manager needs from a coordination store.
///
/// Implementations must be safe to share between tasks.
#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    /// Grant a lease that expires after `ttl_secs` unless renewed.
    async fn grant(&self, ttl_secs: u64) -> Result<LeaseId, StoreError>;

    /// Start renewing `lease`. Acks arrive on the returned stream until the
    /// lease can no longer be renewed or the receiver is dropped.
    async fn keep_alive(&self, lease: LeaseId, ttl_secs: u64) -> Result<RenewalStream, StoreError>;

    /// Write `endpoint` under `key`, attached to `lease`.
    async fn put_endpoint(&self, key: &str, endpoint: &Endpoint, lease: LeaseId) -> Result<(), StoreError>;

    async fn delete_endpoint(&self, key: &str) -> Result<(), StoreError>;

    /// Revoke `lease`, removing every key attached to it.
    async fn revoke(&self, lease: LeaseId) -> Result<(), StoreError>;
}

/// Interval between keepalive requests for a lease of `ttl_secs`.
pub(crate) fn renewal_interval(ttl_secs: u64) -> Duration {
    Duration::from_millis((ttl_secs * 1000 / 3).max(100))
}

/// Why a keepalive round did not produce an ack.
#[derive(Debug)]
pub(crate) enum RoundEnd<E> {
    /// The renewal stream's receiver was dropped.
    Closed,
    /// No ack within the lease TTL.
    TimedOut,
    Failed(E),
}

/// Run one keepalive request/response round. Gives up once the lease TTL has
/// passed without an answer or nobody listens for renewals anymore.
pub(crate) async fn keepalive_round<T, E>(
    renewals: &mpsc::Sender<LeaseRenewal>,
    ttl_secs: u64,
    round: impl Future<Output = Result<T, E>>,
) -> Result<T, RoundEnd<E>> {
    let budget = Duration::from_secs(ttl_secs.max(1));
    tokio::select! {
        _ = renewals.closed() => Err(RoundEnd::Closed),
        result = tokio::time::timeout(budget, round) => match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(RoundEnd::Failed(e)),
            Err(_) => Err(RoundEnd::TimedOut),
        },
    }
}
