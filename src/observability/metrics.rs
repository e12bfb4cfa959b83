//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_backend_requests_total` (counter): backend calls by layer,
//!   name, completeness and error kind
//! - `gateway_backend_duration_seconds` (histogram): backend call latency
//! - `gateway_requests_total` (counter): endpoint requests by endpoint,
//!   method and status
//! - `gateway_request_duration_seconds` (histogram): endpoint latency
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   exporter every update is a no-op
//! - The collector is a cheap handle passed to the pipeline, so a disabled
//!   collector keeps the backend layer out of the pipeline entirely

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::{BackendConfig, ObservabilityConfig};
use crate::observability::ObservabilityError;
use crate::pipeline::BackendLayer;
use crate::proxy::{Context, Proxy, ProxyError, ProxyRef, Request, Response};

/// Label of the per-backend layer.
pub const BACKEND_LAYER: &str = "backend";

const NO_ERROR: &str = "none";

/// Install the Prometheus exporter and its HTTP listener.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(address: &str) -> Result<(), ObservabilityError> {
    let addr: SocketAddr = address
        .parse()
        .map_err(|_| ObservabilityError::InvalidAddress(address.to_string()))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| ObservabilityError::Metrics(e.to_string()))?;

    describe_counter!("gateway_backend_requests_total", "Backend calls by outcome");
    describe_histogram!("gateway_backend_duration_seconds", "Backend call latency in seconds");
    describe_counter!("gateway_requests_total", "Endpoint requests by status");
    describe_histogram!("gateway_request_duration_seconds", "Endpoint latency in seconds");

    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Shared handle used by the pipeline and the server to record metrics.
#[derive(Debug, Clone, Copy)]
pub struct MetricsCollector {
    backend: bool,
    endpoint: bool,
}

impl MetricsCollector {
    pub fn new(config: &ObservabilityConfig) -> Self {
        Self {
            backend: config.metrics_enabled && config.backend_metrics,
            endpoint: config.metrics_enabled,
        }
    }

    pub fn disabled() -> Self {
        Self {
            backend: false,
            endpoint: false,
        }
    }

    pub fn backend_enabled(&self) -> bool {
        self.backend
    }

    pub fn record_backend(
        &self,
        layer: &'static str,
        name: &str,
        result: &Result<Response, ProxyError>,
        elapsed: Duration,
    ) {
        if !self.backend {
            return;
        }
        let (complete, error) = match result {
            Ok(response) => (response.is_complete, NO_ERROR),
            Err(e) => (false, e.kind()),
        };
        counter!(
            "gateway_backend_requests_total",
            "layer" => layer,
            "name" => name.to_string(),
            "complete" => complete.to_string(),
            "error" => error,
        )
        .increment(1);
        histogram!(
            "gateway_backend_duration_seconds",
            "layer" => layer,
            "name" => name.to_string(),
        )
        .record(elapsed.as_secs_f64());
    }

    pub fn record_request(&self, endpoint: &str, method: &str, status: u16, elapsed: Duration) {
        if !self.endpoint {
            return;
        }
        counter!(
            "gateway_requests_total",
            "endpoint" => endpoint.to_string(),
            "method" => method.to_string(),
            "status" => status.to_string(),
        )
        .increment(1);
        histogram!(
            "gateway_request_duration_seconds",
            "endpoint" => endpoint.to_string(),
        )
        .record(elapsed.as_secs_f64());
    }
}

struct MetricsProxy {
    collector: MetricsCollector,
    name: String,
    next: ProxyRef,
}

impl Proxy for MetricsProxy {
    fn call<'a>(
        &'a self,
        ctx: &'a Context,
        request: Request,
    ) -> BoxFuture<'a, Result<Response, ProxyError>> {
        Box::pin(async move {
            let start = Instant::now();
            let result = self.next.call(ctx, request).await;
            self.collector
                .record_backend(BACKEND_LAYER, &self.name, &result, start.elapsed());
            result
        })
    }
}

/// Pipeline layer recording per-backend metrics.
#[derive(Debug, Clone)]
pub struct MetricsLayer {
    collector: MetricsCollector,
}

impl MetricsLayer {
    pub fn new(collector: MetricsCollector) -> Self {
        Self { collector }
    }
}

impl BackendLayer for MetricsLayer {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn is_active(&self, _remote: &BackendConfig) -> bool {
        self.collector.backend_enabled()
    }

    fn wrap(&self, remote: &BackendConfig, next: ProxyRef) -> ProxyRef {
        Arc::new(MetricsProxy {
            collector: self.collector,
            name: remote.name.clone(),
            next,
        })
    }
}
