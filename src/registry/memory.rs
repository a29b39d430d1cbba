//! In-process coordination store.
//!
//! Leases expire on the tokio clock exactly like a real store would expire
//! them, so paused-time tests can observe TTL behaviour. Individual
//! operations can be made to fail or hang to exercise error paths.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::registry::store::{
    renewal_interval, CoordinationStore, Endpoint, LeaseId, LeaseRenewal, RenewalStream, StoreError,
};

/// Store operation, used to target injected faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Grant,
    KeepAlive,
    Put,
    Delete,
    Revoke,
}

#[derive(Debug, Clone, Copy)]
enum Fault {
    Fail,
    Stall,
}

struct StoredEntry {
    value: String,
    lease: LeaseId,
}

struct LeaseState {
    ttl: Duration,
    deadline: Instant,
    severed: bool,
}

#[derive(Default)]
struct Inner {
    entries: DashMap<String, StoredEntry>,
    leases: DashMap<LeaseId, LeaseState>,
    faults: DashMap<StoreOp, Fault>,
    next_lease: AtomicI64,
    grants: AtomicUsize,
    revocations: AtomicUsize,
}

impl Inner {
    fn purge_expired(&self) {
        let now = Instant::now();
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|lease| lease.deadline <= now)
            .map(|lease| *lease.key())
            .collect();

        for id in expired {
            self.leases.remove(&id);
            self.entries.retain(|_, entry| entry.lease != id);
            tracing::debug!(lease = %id, "Lease expired");
        }
    }

    /// Refresh a lease. `None` once the lease is gone or renewals were severed.
    fn renew(&self, id: LeaseId) -> Option<u64> {
        self.purge_expired();
        let mut lease = self.leases.get_mut(&id)?;
        if lease.severed {
            return None;
        }
        lease.deadline = Instant::now() + lease.ttl;
        Some(lease.ttl.as_secs())
    }

    async fn gate(&self, op: StoreOp) -> Result<(), StoreError> {
        let fault = self.faults.get(&op).map(|f| *f);
        match fault {
            Some(Fault::Fail) => Err(StoreError::Unavailable(format!("{:?} rejected", op))),
            Some(Fault::Stall) => std::future::pending().await,
            None => Ok(()),
        }
    }
}

/// Coordination store living entirely inside this process.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future `op` fail with [`StoreError::Unavailable`].
    pub fn fail(&self, op: StoreOp) {
        self.inner.faults.insert(op, Fault::Fail);
    }

    /// Make every future `op` hang forever.
    pub fn stall(&self, op: StoreOp) {
        self.inner.faults.insert(op, Fault::Stall);
    }

    /// Remove any fault injected for `op`.
    pub fn heal(&self, op: StoreOp) {
        self.inner.faults.remove(&op);
    }

    /// Stop renewing `lease`. Its keepalive stream ends at the next tick and
    /// the lease then expires after its TTL.
    pub fn sever_keepalive(&self, lease: LeaseId) {
        if let Some(mut state) = self.inner.leases.get_mut(&lease) {
            state.severed = true;
        }
    }

    /// Read the endpoint stored under `key`, honouring lease expiry.
    pub fn get(&self, key: &str) -> Option<Endpoint> {
        self.inner.purge_expired();
        let entry = self.inner.entries.get(key)?;
        serde_json::from_str(&entry.value).ok()
    }

    /// All live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.inner.purge_expired();
        let mut keys: Vec<String> = self.inner.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn lease_alive(&self, lease: LeaseId) -> bool {
        self.inner.purge_expired();
        self.inner.leases.contains_key(&lease)
    }

    /// Number of successful grants so far.
    pub fn grants(&self) -> usize {
        self.inner.grants.load(Ordering::SeqCst)
    }

    /// Number of revoke calls received so far, successful or not.
    pub fn revocations(&self) -> usize {
        self.inner.revocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn grant(&self, ttl_secs: u64) -> Result<LeaseId, StoreError> {
        self.inner.gate(StoreOp::Grant).await?;

        let id = LeaseId(self.inner.next_lease.fetch_add(1, Ordering::SeqCst) + 1);
        let ttl = Duration::from_secs(ttl_secs);
        self.inner.leases.insert(
            id,
            LeaseState {
                ttl,
                deadline: Instant::now() + ttl,
                severed: false,
            },
        );
        self.inner.grants.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn keep_alive(&self, lease: LeaseId, ttl_secs: u64) -> Result<RenewalStream, StoreError> {
        self.inner.gate(StoreOp::KeepAlive).await?;
        self.inner.purge_expired();
        if !self.inner.leases.contains_key(&lease) {
            return Err(StoreError::LeaseNotFound(lease));
        }

        let (tx, rx) = mpsc::channel(16);
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(renewal_interval(ttl_secs));
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = ticker.tick() => {}
                }
                let Some(ttl_secs) = inner.renew(lease) else {
                    break;
                };
                if tx.send(LeaseRenewal { lease, ttl_secs }).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    async fn put_endpoint(&self, key: &str, endpoint: &Endpoint, lease: LeaseId) -> Result<(), StoreError> {
        self.inner.gate(StoreOp::Put).await?;
        self.inner.purge_expired();
        if !self.inner.leases.contains_key(&lease) {
            return Err(StoreError::LeaseNotFound(lease));
        }

        let value = serde_json::to_string(endpoint)?;
        self.inner
            .entries
            .insert(key.to_string(), StoredEntry { value, lease });
        Ok(())
    }

    async fn delete_endpoint(&self, key: &str) -> Result<(), StoreError> {
        self.inner.gate(StoreOp::Delete).await?;
        self.inner.entries.remove(key);
        Ok(())
    }

    async fn revoke(&self, lease: LeaseId) -> Result<(), StoreError> {
        self.inner.revocations.fetch_add(1, Ordering::SeqCst);
        self.inner.gate(StoreOp::Revoke).await?;
        self.inner.purge_expired();

        if self.inner.leases.remove(&lease).is_none() {
            return Err(StoreError::LeaseNotFound(lease));
        }
        self.inner.entries.retain(|_, entry| entry.lease != lease);
        Ok(())
    }
}
