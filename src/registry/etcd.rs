//! etcd-backed coordination store.

use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, PutOptions};
use tokio::sync::mpsc;

use crate::config::RegistryConfig;
use crate::registry::store::{
    keepalive_round, renewal_interval, CoordinationStore, Endpoint, LeaseId, LeaseRenewal,
    RenewalStream, RoundEnd, StoreError,
};

/// Coordination store backed by an etcd v3 cluster.
///
/// `Client` is a cheap handle over a shared channel; every call works on a
/// clone so the store can be used from many tasks at once.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    /// Connect to the endpoints listed in `config`.
    pub async fn connect(config: &RegistryConfig) -> Result<Self, StoreError> {
        let options = ConnectOptions::new().with_connect_timeout(config.dial_timeout());
        let client = Client::connect(&config.endpoints, Some(options)).await?;

        tracing::info!(endpoints = ?config.endpoints, "Connected to etcd");
        Ok(Self { client })
    }

    /// Wrap an already connected client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn grant(&self, ttl_secs: u64) -> Result<LeaseId, StoreError> {
        let ttl = i64::try_from(ttl_secs)
            .map_err(|_| StoreError::Unavailable(format!("ttl {} out of range", ttl_secs)))?;
        let response = self.client.clone().lease_grant(ttl, None).await?;
        Ok(LeaseId(response.id()))
    }

    async fn keep_alive(&self, lease: LeaseId, ttl_secs: u64) -> Result<RenewalStream, StoreError> {
        let (mut keeper, mut responses) = self.client.clone().lease_keep_alive(lease.0).await?;
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(renewal_interval(ttl_secs));
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = ticker.tick() => {}
                }

                let round = keepalive_round(&tx, ttl_secs, async {
                    match keeper.keep_alive().await {
                        Ok(()) => responses.message().await,
                        Err(e) => Err(e),
                    }
                })
                .await;

                match round {
                    Ok(Some(resp)) if resp.ttl() > 0 => {
                        let renewal = LeaseRenewal {
                            lease,
                            ttl_secs: resp.ttl() as u64,
                        };
                        if tx.send(renewal).await.is_err() {
                            break;
                        }
                    }
                    Ok(Some(_)) => {
                        tracing::warn!(lease = %lease, "etcd reports lease expired");
                        break;
                    }
                    Ok(None) => break,
                    Err(RoundEnd::Closed) => break,
                    Err(RoundEnd::TimedOut) => {
                        tracing::warn!(lease = %lease, ttl_secs, "No keepalive response within the lease TTL");
                        break;
                    }
                    Err(RoundEnd::Failed(e)) => {
                        tracing::warn!(lease = %lease, error = %e, "Keepalive stream failed");
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn put_endpoint(&self, key: &str, endpoint: &Endpoint, lease: LeaseId) -> Result<(), StoreError> {
        let value = serde_json::to_string(endpoint)?;
        self.client
            .clone()
            .put(key, value, Some(PutOptions::new().with_lease(lease.0)))
            .await?;
        Ok(())
    }

    async fn delete_endpoint(&self, key: &str) -> Result<(), StoreError> {
        self.client.clone().delete(key, None).await?;
        Ok(())
    }

    async fn revoke(&self, lease: LeaseId) -> Result<(), StoreError> {
        self.client.clone().lease_revoke(lease.0).await?;
        Ok(())
    }
}
