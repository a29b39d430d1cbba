//! Startup orchestration.
//!
//! Turns a validated configuration into a ready-to-run group:
//! coordination store first, then the registration manager, then the actors.
//! Any failure here is fatal; nothing is retried.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use tonic::service::Routes;

use crate::config::{HarnessConfig, RegistryBackend, RegistryConfig};
use crate::lifecycle::group::{ActorError, RunGroup, EXIT_OK};
use crate::lifecycle::signals::SignalWatcher;
use crate::observability::MetricsServer;
use crate::registry::{
    CoordinationStore, EtcdStore, MemoryStore, RegistrationManager, RegistrationTimeouts, StoreError,
};
use crate::rpc::{RpcServer, RpcServerConfig};

/// Open the configured coordination store.
pub async fn connect_store(config: &RegistryConfig) -> Result<Arc<dyn CoordinationStore>, StoreError> {
    match config.backend {
        RegistryBackend::Etcd => Ok(Arc::new(EtcdStore::connect(config).await?)),
        RegistryBackend::Memory => {
            tracing::warn!("Using in-process registry, this instance is not discoverable by other processes");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Assemble the run group: RPC server, metrics endpoint (when enabled and a
/// recorder handle is available) and the signal watcher.
pub fn build_group(
    config: &HarnessConfig,
    store: Arc<dyn CoordinationStore>,
    routes: Routes,
    metrics: Option<PrometheusHandle>,
) -> RunGroup {
    let registry = Arc::new(RegistrationManager::new(
        store,
        RegistrationTimeouts::from(&config.registry),
    ));

    let mut group = RunGroup::new();
    group.add(RpcServer::new(
        RpcServerConfig::from_config(&config.service, &config.shutdown),
        routes,
        registry,
    ));

    match metrics {
        Some(handle) if config.metrics.enabled => {
            group.add(MetricsServer::new(config.metrics.clone(), handle));
        }
        _ => tracing::info!("Metrics endpoint disabled"),
    }

    group.add(SignalWatcher::new());
    group
}

/// Process exit status for the result of [`RunGroup::run`].
pub fn exit_status(result: &Result<(), ActorError>) -> u8 {
    match result {
        Ok(()) => EXIT_OK,
        Err(e) => e.exit_code(),
    }
}
