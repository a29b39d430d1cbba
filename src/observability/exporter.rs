//! Pull-based metrics endpoint, run as a group actor.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use axum::{extract::State, http::header, response::IntoResponse, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::config::MetricsConfig;
use crate::lifecycle::{Actor, ActorError, Shutdown};

/// Router serving `GET /metrics` and `GET /health`.
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .route("/health", get(health))
        .with_state(handle)
        .layer(TraceLayer::new_for_http())
}

async fn render_metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}

async fn health() -> &'static str {
    "ok"
}

/// HTTP server exposing the Prometheus registry.
///
/// Interrupting it closes the listener and gives open connections
/// `shutdown_timeout` to finish before the server is dropped.
pub struct MetricsServer {
    config: MetricsConfig,
    handle: PrometheusHandle,
    started: AtomicBool,
    stop: Shutdown,
    hard_stop: Shutdown,
    stopped: Shutdown,
    bound: watch::Sender<Option<SocketAddr>>,
}

impl MetricsServer {
    pub fn new(config: MetricsConfig, handle: PrometheusHandle) -> Self {
        let (bound, _) = watch::channel(None);
        Self {
            config,
            handle,
            started: AtomicBool::new(false),
            stop: Shutdown::new(),
            hard_stop: Shutdown::new(),
            stopped: Shutdown::new(),
            bound,
        }
    }

    /// Wait until the listener is bound and return its address.
    pub async fn wait_bound(&self) -> Option<SocketAddr> {
        let mut rx = self.bound.subscribe();
        rx.wait_for(Option::is_some).await.ok().and_then(|addr| *addr)
    }

    async fn serve(&self) -> Result<(), ActorError> {
        let addr = self.config.bind_address.clone();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ActorError::Bind { addr, source })?;
        let local_addr = listener.local_addr().map_err(ActorError::Metrics)?;
        self.bound.send_replace(Some(local_addr));

        tracing::info!(address = %local_addr, "Metrics endpoint listening");

        let stop = self.stop.clone();
        let server = axum::serve(listener, metrics_router(self.handle.clone()))
            .with_graceful_shutdown(async move { stop.wait().await })
            .into_future();

        tokio::select! {
            result = server => {
                result.map_err(ActorError::Metrics)?;
                tracing::info!("Metrics endpoint stopped");
            }
            _ = self.hard_stop.wait() => {
                tracing::warn!("Metrics endpoint hard-stopped with connections still open");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Actor for MetricsServer {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn execute(&self) -> Result<(), ActorError> {
        self.started.store(true, Ordering::SeqCst);
        let result = if self.stop.is_triggered() {
            Ok(())
        } else {
            self.serve().await
        };
        self.stopped.trigger();
        result
    }

    async fn interrupt(&self, _cause: Option<&ActorError>) {
        self.stop.trigger();
        if !self.started.load(Ordering::SeqCst) || self.stopped.is_triggered() {
            tracing::debug!("Metrics endpoint already closed");
            return;
        }

        let budget = self.config.shutdown_timeout();
        if tokio::time::timeout(budget, self.stopped.wait()).await.is_err() {
            tracing::warn!(timeout = ?budget, "Metrics endpoint did not shut down in time");
        }
        self.hard_stop.trigger();
        self.stopped.wait().await;
    }
}
