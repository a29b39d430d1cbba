//! Metrics collection.
//!
//! # Metrics
//! - `registry_registrations_total` (counter): register attempts by outcome
//! - `registry_unregistrations_total` (counter): unregister attempts by outcome
//! - `registry_lease_renewals_total` (counter): keepalive acks received
//! - `registry_lease_lost_total` (counter): keepalive streams that ended on their own
//! - `lifecycle_actor_exits_total` (counter): actor completions by actor, outcome
//! - `rpc_requests_total` (counter): RPC calls by method, outcome
//! - `rpc_request_duration_seconds` (histogram): RPC latency by method

use std::task::{Context, Poll};
use std::time::Instant;

use axum::http::Request;
use futures_util::future::BoxFuture;
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tower::{Layer, Service};

/// Install the global Prometheus recorder and return its render handle.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(handle)
}

fn describe_metrics() {
    describe_counter!("registry_registrations_total", "Register attempts by outcome");
    describe_counter!("registry_unregistrations_total", "Unregister attempts by outcome");
    describe_counter!("registry_lease_renewals_total", "Lease keepalive acknowledgements");
    describe_counter!("registry_lease_lost_total", "Keepalive streams that ended unexpectedly");
    describe_counter!("lifecycle_actor_exits_total", "Actor completions by outcome");
    describe_counter!("rpc_requests_total", "RPC calls handled");
    describe_histogram!("rpc_request_duration_seconds", Unit::Seconds, "RPC call latency");
}

pub fn record_registration(outcome: &'static str) {
    counter!("registry_registrations_total", "outcome" => outcome).increment(1);
}

pub fn record_unregistration(outcome: &'static str) {
    counter!("registry_unregistrations_total", "outcome" => outcome).increment(1);
}

pub fn record_lease_renewal() {
    counter!("registry_lease_renewals_total").increment(1);
}

pub fn record_lease_lost() {
    counter!("registry_lease_lost_total").increment(1);
}

pub fn record_actor_exit(actor: &str, outcome: &'static str) {
    counter!("lifecycle_actor_exits_total", "actor" => actor.to_string(), "outcome" => outcome).increment(1);
}

fn record_rpc(method: String, start: Instant, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    histogram!("rpc_request_duration_seconds", "method" => method.clone())
        .record(start.elapsed().as_secs_f64());
    counter!("rpc_requests_total", "method" => method, "outcome" => outcome).increment(1);
}

/// Tower layer recording count and latency of every RPC call, keyed by the
/// request path (`/package.Service/Method`).
#[derive(Debug, Clone, Copy, Default)]
pub struct RpcMetricsLayer;

impl<S> Layer<S> for RpcMetricsLayer {
    type Service = RpcMetrics<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RpcMetrics { inner }
    }
}

#[derive(Debug, Clone)]
pub struct RpcMetrics<S> {
    inner: S,
}

impl<S, B> Service<Request<B>> for RpcMetrics<S>
where
    S: Service<Request<B>>,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<S::Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let method = request.uri().path().to_string();
        let start = Instant::now();
        let call = self.inner.call(request);

        Box::pin(async move {
            let result = call.await;
            record_rpc(method, start, result.is_ok());
            result
        })
    }
}
