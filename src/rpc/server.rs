//! RPC server that registers itself in the coordination store.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::service::Routes;
use tonic::transport::Server;
use tower_http::trace::TraceLayer;

use crate::config::{ServiceConfig, ShutdownConfig};
use crate::lifecycle::{Actor, ActorError, Shutdown};
use crate::observability::metrics::RpcMetricsLayer;
use crate::registry::{listen_addr, service_addr, RegistrationManager};

/// Lifecycle state of the RPC server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcState {
    Idle,
    Serving,
    Draining,
    Stopped,
}

/// Settings for one RPC server instance.
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub service_name: String,
    /// Host advertised in the discovery entry.
    pub host: String,
    /// Listener port; `0` picks a free port and advertises it.
    pub port: u16,
    pub ttl_secs: u64,
    pub accept_http1: bool,
    /// Longest time in-flight calls get before the hard stop.
    pub drain_timeout: Duration,
}

impl RpcServerConfig {
    pub fn from_config(service: &ServiceConfig, shutdown: &ShutdownConfig) -> Self {
        Self {
            service_name: service.name.clone(),
            host: service.host.clone(),
            port: service.port,
            ttl_secs: service.ttl_secs,
            accept_http1: service.accept_http1,
            drain_timeout: shutdown.drain_timeout(),
        }
    }
}

/// Serves the caller's RPC routes and keeps this instance discoverable
/// while doing so.
pub struct RpcServer {
    config: RpcServerConfig,
    routes: Mutex<Option<Routes>>,
    registry: Arc<RegistrationManager>,
    started: AtomicBool,
    drain: Shutdown,
    hard_stop: Shutdown,
    stopped: Shutdown,
    state: watch::Sender<RpcState>,
    bound: watch::Sender<Option<SocketAddr>>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, routes: Routes, registry: Arc<RegistrationManager>) -> Self {
        let (state, _) = watch::channel(RpcState::Idle);
        let (bound, _) = watch::channel(None);
        Self {
            config,
            routes: Mutex::new(Some(routes)),
            registry,
            started: AtomicBool::new(false),
            drain: Shutdown::new(),
            hard_stop: Shutdown::new(),
            stopped: Shutdown::new(),
            state,
            bound,
        }
    }

    pub fn state(&self) -> RpcState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RpcState> {
        self.state.subscribe()
    }

    /// Wait until the listener is bound and return its address.
    pub async fn wait_bound(&self) -> Option<SocketAddr> {
        let mut rx = self.bound.subscribe();
        rx.wait_for(Option::is_some).await.ok().and_then(|addr| *addr)
    }

    pub fn registry(&self) -> &Arc<RegistrationManager> {
        &self.registry
    }

    async fn serve(&self) -> Result<(), ActorError> {
        let routes = self
            .routes
            .lock()
            .ok()
            .and_then(|mut routes| routes.take())
            .ok_or_else(|| ActorError::other("rpc server already started"))?;

        let addr = listen_addr(self.config.port);
        let listener = TcpListener::bind(&addr).await.map_err(|source| ActorError::Bind {
            addr: addr.clone(),
            source,
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ActorError::Bind { addr, source })?;

        let address = service_addr(&self.config.host, local_addr.port());
        let (registration, lease_loss) = self
            .registry
            .register(&self.config.service_name, &address, self.config.ttl_secs)
            .await?;

        if self.drain.is_triggered() {
            tracing::info!(key = %registration.key(), "Interrupted during startup, withdrawing registration");
            if let Err(e) = self.registry.unregister().await {
                tracing::warn!(error = %e, "Unregister failed");
            }
            return Ok(());
        }

        self.bound.send_replace(Some(local_addr));
        self.transition(RpcState::Idle, RpcState::Serving);
        tracing::info!(address = %local_addr, key = %registration.key(), "RPC server serving");

        let drain = self.drain.clone();
        let server = Server::builder()
            .accept_http1(self.config.accept_http1)
            .layer(TraceLayer::new_for_grpc())
            .layer(RpcMetricsLayer)
            .add_routes(routes)
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                drain.wait().await
            });
        tokio::pin!(server);
        let lease_loss = lease_loss.wait();
        tokio::pin!(lease_loss);

        let lost = tokio::select! {
            result = &mut server => {
                result?;
                tracing::info!("RPC server drained");
                return Ok(());
            }
            Some(lost) = &mut lease_loss => lost,
            _ = self.hard_stop.wait() => {
                tracing::warn!("RPC server hard-stopped with calls still in flight");
                return Ok(());
            }
        };

        // Not discoverable anymore: stop accepting, let in-flight calls
        // finish within the drain budget, then fail.
        tracing::error!(key = %lost.key, "Registration lost, draining RPC server");
        self.begin_drain();
        let budget = self.config.drain_timeout;
        tokio::select! {
            result = tokio::time::timeout(budget, &mut server) => match result {
                Ok(Ok(())) => tracing::info!("RPC server drained"),
                Ok(Err(e)) => tracing::warn!(error = %e, "RPC server failed while draining"),
                Err(_) => tracing::warn!(timeout = ?budget, "Drain deadline exceeded, forcing hard stop"),
            },
            _ = self.hard_stop.wait() => {
                tracing::warn!("RPC server hard-stopped with calls still in flight");
            }
        }
        Err(ActorError::RegistrationLost(lost))
    }

    /// Stop accepting connections and let the serve loop wind down.
    fn begin_drain(&self) {
        self.transition(RpcState::Serving, RpcState::Draining);
        self.drain.trigger();
    }

    fn transition(&self, from: RpcState, to: RpcState) {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
    }
}

#[async_trait]
impl Actor for RpcServer {
    fn name(&self) -> &str {
        "rpc"
    }

    async fn execute(&self) -> Result<(), ActorError> {
        self.started.store(true, Ordering::SeqCst);
        let result = if self.drain.is_triggered() {
            Ok(())
        } else {
            self.serve().await
        };
        self.state.send_replace(RpcState::Stopped);
        self.stopped.trigger();
        result
    }

    async fn interrupt(&self, cause: Option<&ActorError>) {
        self.begin_drain();

        match cause {
            Some(e) => tracing::info!(cause = %e, "Draining RPC server"),
            None => tracing::info!("Draining RPC server"),
        }

        if let Err(e) = self.registry.unregister().await {
            tracing::warn!(error = %e, "Unregister failed during drain");
        }

        if !self.started.load(Ordering::SeqCst) {
            return;
        }

        let budget = self.config.drain_timeout;
        if tokio::time::timeout(budget, self.stopped.wait()).await.is_err() {
            tracing::warn!(timeout = ?budget, "Drain deadline exceeded, forcing hard stop");
        }
        self.hard_stop.trigger();
        self.stopped.wait().await;
    }
}
