//! Pipeline composition.
//!
//! # Layer order (innermost first)
//! ```text
//! base        executor selector → transform resolver → materializer
//! amqp        backend/amqp/consumer, backend/amqp/producer
//! cel         validation/cel
//! ratelimit   qos/ratelimit/proxy
//! circuit     qos/circuit-breaker
//! metrics     layer "backend", when backend metrics are enabled
//! tracing     span "backend", always
//! ```

use std::sync::Arc;

use crate::amqp::{AmqpLayer, BrokerRef};
use crate::cel::ExpressionLayer;
use crate::circuitbreaker::CircuitBreakerLayer;
use crate::client::{ExecutorRef, HttpTransport};
use crate::config::BackendConfig;
use crate::observability::{MetricsCollector, MetricsLayer, TracingLayer};
use crate::pipeline::{materialize, request_executor, resolve_transform, BackendLayer};
use crate::proxy::{BackendFactory, Context, ProxyRef};
use crate::ratelimit::RateLimitLayer;

/// Label of the base handler in [`PipelineComposer::layer_plan`].
pub const BASE: &str = "base";

/// Builds backend handlers in a fixed layer order.
pub struct PipelineComposer {
    transport: ExecutorRef,
    layers: Vec<Box<dyn BackendLayer>>,
}

impl PipelineComposer {
    /// Composer over the default hyper transport.
    ///
    /// `ctx` is the process-wide context; long-lived middleware (queue
    /// consumers) stops when it is cancelled.
    pub fn new(ctx: Context, metrics: MetricsCollector, broker: BrokerRef) -> Self {
        let layers: Vec<Box<dyn BackendLayer>> = vec![
            Box::new(AmqpLayer::new(ctx, broker)),
            Box::new(ExpressionLayer),
            Box::new(RateLimitLayer),
            Box::new(CircuitBreakerLayer),
            Box::new(MetricsLayer::new(metrics)),
            Box::new(TracingLayer),
        ];
        Self {
            transport: Arc::new(HttpTransport::default()),
            layers,
        }
    }

    pub fn with_transport(mut self, transport: ExecutorRef) -> Self {
        self.transport = transport;
        self
    }

    /// Names of the layers a backend gets, innermost first.
    pub fn layer_plan(&self, remote: &BackendConfig) -> Vec<&'static str> {
        std::iter::once(BASE)
            .chain(
                self.layers
                    .iter()
                    .filter(|layer| layer.is_active(remote))
                    .map(|layer| layer.name()),
            )
            .collect()
    }

    /// Build the handler of one backend.
    pub fn backend(&self, remote: &BackendConfig) -> ProxyRef {
        let executor = request_executor(remote, &self.transport);
        let executor = resolve_transform(remote, executor);
        let base = materialize(remote, executor);

        self.layers
            .iter()
            .filter(|layer| layer.is_active(remote))
            .fold(base, |next, layer| layer.wrap(remote, next))
    }

    pub fn build(self) -> BackendFactory {
        Arc::new(move |remote: &BackendConfig| self.backend(remote))
    }
}

/// Backend factory over the given transport.
pub fn new_backend_factory(
    ctx: Context,
    metrics: MetricsCollector,
    broker: BrokerRef,
    transport: ExecutorRef,
) -> BackendFactory {
    PipelineComposer::new(ctx, metrics, broker)
        .with_transport(transport)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::{InMemoryBroker, CONSUMER_NAMESPACE};
    use crate::client::executor_fn;
    use crate::config::ObservabilityConfig;
    use crate::proxy::{ProxyError, Request};
    use axum::body::Bytes;
    use axum::http::{Response, StatusCode};
    use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn composer(transport: ExecutorRef) -> PipelineComposer {
        PipelineComposer::new(
            Context::new(),
            MetricsCollector::new(&ObservabilityConfig::default()),
            Arc::new(InMemoryBroker::new()),
        )
        .with_transport(transport)
    }

    fn upstream(status: u16, body: &'static str) -> ExecutorRef {
        executor_fn(move |_ctx, _req| async move {
            let mut response = Response::new(Bytes::from_static(body.as_bytes()));
            *response.status_mut() = StatusCode::from_u16(status).unwrap();
            Ok::<_, ProxyError>(response)
        })
    }

    fn remote(encoding: &str) -> BackendConfig {
        BackendConfig {
            name: "users".into(),
            hosts: vec!["http://users.local".into()],
            url_pattern: "/users/{id}".into(),
            encoding: encoding.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_layer_plan_order() {
        let composer = composer(upstream(200, "{}"));
        assert_eq!(composer.layer_plan(&remote("json")), vec![BASE, "metrics", "tracing"]);

        let mut full = remote("json");
        for ns in [
            crate::circuitbreaker::NAMESPACE,
            crate::ratelimit::NAMESPACE,
            crate::cel::NAMESPACE,
            CONSUMER_NAMESPACE,
        ] {
            full.extra_config.insert(ns.into(), json!({}));
        }
        assert_eq!(
            composer.layer_plan(&full),
            vec![BASE, "amqp", "cel", "ratelimit", "circuitbreaker", "metrics", "tracing"]
        );
    }

    #[test]
    fn test_disabled_metrics_skip_layer() {
        let composer = PipelineComposer::new(
            Context::new(),
            MetricsCollector::disabled(),
            Arc::new(InMemoryBroker::new()),
        );
        assert_eq!(composer.layer_plan(&remote("json")), vec![BASE, "tracing"]);
    }

    #[tokio::test]
    async fn test_noop_encoding_returns_raw_body() {
        let factory = composer(upstream(200, "ok")).build();
        let response = factory(&remote("no-op"))
            .call(&Context::new(), Request::default())
            .await
            .unwrap();
        assert_eq!(response.body.as_deref(), Some(&b"ok"[..]));
        assert!(response.data.is_empty());
    }

    #[tokio::test]
    async fn test_unlisted_status_is_rejected_before_parsing() {
        let factory = composer(upstream(500, "<html>oops</html>")).build();
        let result = factory(&remote("json"))
            .call(&Context::new(), Request::default())
            .await;
        assert!(matches!(result, Err(ProxyError::InvalidStatusCode { status: 500 })));
    }

    #[tokio::test]
    async fn test_listed_error_status_is_parsed() {
        let factory = composer(upstream(404, r#"{"error": "missing"}"#)).build();
        let response = factory(&remote("json"))
            .call(&Context::new(), Request::default())
            .await
            .unwrap();
        assert_eq!(response.data["error"], json!("missing"));
    }

    #[tokio::test]
    async fn test_decoded_response_follows_mapping() {
        let body = r#"{"id": 7, "full_name": "Ada", "secret": "x"}"#;
        let factory = composer(upstream(200, body)).build();
        let mut backend = remote("json");
        backend.deny = vec!["secret".into()];
        backend.mapping = BTreeMap::from([("full_name".to_string(), "name".to_string())]);

        let response = factory(&backend)
            .call(&Context::new(), Request::default())
            .await
            .unwrap();
        assert!(response.is_complete);
        assert_eq!(response.data.get("name"), Some(&json!("Ada")));
        assert_eq!(response.data.get("id"), Some(&json!(7)));
        assert!(response.data.get("secret").is_none());
        assert!(response.data.get("full_name").is_none());
    }

    #[tokio::test]
    async fn test_malformed_transform_still_builds() {
        let factory = composer(upstream(200, r#"{"a": 1}"#)).build();
        let mut backend = remote("json");
        backend
            .extra_config
            .insert(crate::transform::NAMESPACE.into(), json!({"request": "oops"}));
        let response = factory(&backend)
            .call(&Context::new(), Request::default())
            .await
            .unwrap();
        assert_eq!(response.data["a"], json!(1));
    }

    #[tokio::test]
    async fn test_rebuild_is_deterministic() {
        let composer = composer(upstream(200, r#"{"a": {"b": 2}}"#));
        let mut backend = remote("json");
        backend.target = Some("a".into());
        backend.group = Some("grouped".into());

        let first = composer.backend(&backend);
        let second = composer.backend(&backend);
        assert_eq!(composer.layer_plan(&backend), composer.layer_plan(&backend));

        let a = first.call(&Context::new(), Request::default()).await.unwrap();
        let b = second.call(&Context::new(), Request::default()).await.unwrap();
        assert_eq!(a.data, b.data);
        assert_eq!(a.data["grouped"], json!({"b": 2}));
    }

    fn backend_requests(snapshot: &Snapshotter, name: &str, error: &str) -> u64 {
        snapshot
            .snapshot()
            .into_vec()
            .into_iter()
            .filter(|(key, ..)| key.key().name() == "gateway_backend_requests_total")
            .filter(|(key, ..)| {
                let labels: Vec<(&str, &str)> =
                    key.key().labels().map(|l| (l.key(), l.value())).collect();
                labels.contains(&("layer", "backend"))
                    && labels.contains(&("name", name))
                    && labels.contains(&("error", error))
            })
            .map(|(.., value)| match value {
                DebugValue::Counter(count) => count,
                _ => 0,
            })
            .sum()
    }

    #[test]
    fn test_rejected_calls_are_counted() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        let mut backend = remote("json");
        backend.extra_config.insert(
            crate::circuitbreaker::NAMESPACE.into(),
            json!({"interval": 60, "timeout": 60, "max_errors": 0}),
        );
        let handler = composer(upstream(500, "{}")).backend(&backend);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        ::metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                let first = handler.call(&Context::new(), Request::default()).await;
                assert!(matches!(first, Err(ProxyError::InvalidStatusCode { status: 500 })));
                for _ in 0..2 {
                    let rejected = handler.call(&Context::new(), Request::default()).await;
                    assert!(matches!(rejected, Err(ProxyError::CircuitOpen { .. })));
                }
            })
        });

        assert_eq!(backend_requests(&snapshotter, "users", "invalid_status"), 1);
        assert_eq!(backend_requests(&snapshotter, "users", "circuit_open"), 2);
    }
}
