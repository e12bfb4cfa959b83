//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the gateway handler
//! - Wire up middleware (tracing, timeout, request ID)
//! - Dispatch requests to every backend of the matched endpoint
//! - Swap the endpoint table when the configuration changes
//! - Observability (metrics, correlation IDs)

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use futures_util::future::join_all;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::GatewayConfig;
use crate::http::request::{backend_request, request_id};
use crate::http::response::{self, BackendResult};
use crate::observability::MetricsCollector;
use crate::proxy::{BackendFactory, Context};
use crate::routing::{EndpointTable, RouteMatch};

/// Extra time the outer timeout grants over the slowest endpoint, so
/// endpoint deadlines fire first and produce a proper error body.
const TIMEOUT_MARGIN: Duration = Duration::from_secs(1);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    table: Arc<ArcSwap<EndpointTable>>,
    root: Context,
    metrics: MetricsCollector,
    max_body_bytes: usize,
}

/// HTTP gateway serving the configured endpoints.
pub struct GatewayServer {
    config: GatewayConfig,
    factory: BackendFactory,
    state: AppState,
}

impl GatewayServer {
    pub fn new(
        config: GatewayConfig,
        factory: BackendFactory,
        root: Context,
        metrics: MetricsCollector,
    ) -> Self {
        let table = EndpointTable::build(&config, &factory);
        let state = AppState {
            table: Arc::new(ArcSwap::from_pointee(table)),
            root,
            metrics,
            max_body_bytes: config.listener.max_body_bytes,
        };
        Self {
            config,
            factory,
            state,
        }
    }

    /// Get a reference to the startup config.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Current endpoint table.
    pub fn table(&self) -> Arc<EndpointTable> {
        self.state.table.load_full()
    }

    /// Rebuild every backend from `config` and swap the table in.
    /// Requests in flight finish on the table they started with.
    pub fn reload(&self, config: &GatewayConfig) {
        reload_table(&self.state, &self.factory, config);
    }

    /// Apply configurations from `updates` until the channel closes or the
    /// root context is cancelled.
    pub fn spawn_reloader(
        &self,
        mut updates: mpsc::UnboundedReceiver<GatewayConfig>,
    ) -> JoinHandle<()> {
        let state = self.state.clone();
        let factory = self.factory.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = state.root.cancelled() => break,
                    update = updates.recv() => match update {
                        Some(config) => reload_table(&state, &factory, &config),
                        None => break,
                    },
                }
            }
            tracing::debug!("Config reloader stopped");
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn router(&self) -> Router {
        let slowest = self
            .config
            .endpoints
            .iter()
            .filter_map(|e| e.timeout_ms)
            .chain(std::iter::once(self.config.timeouts.request_ms))
            .max()
            .unwrap_or(self.config.timeouts.request_ms);

        Router::new()
            .route("/{*path}", any(gateway_handler))
            .route("/", any(gateway_handler))
            .with_state(self.state.clone())
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(TimeoutLayer::new(Duration::from_millis(slowest) + TIMEOUT_MARGIN)),
            )
    }

    /// Run the server until the root context is cancelled.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, endpoints = self.table().len(), "HTTP server starting");

        let root = self.state.root.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { root.cancelled().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

fn reload_table(state: &AppState, factory: &BackendFactory, config: &GatewayConfig) {
    let table = EndpointTable::build(config, factory);
    tracing::info!(endpoints = table.len(), "Endpoint table reloaded");
    state.table.store(Arc::new(table));
}

/// Main gateway handler.
/// Looks up the endpoint, calls its backends concurrently and merges the
/// results.
async fn gateway_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let (parts, body) = request.into_parts();
    let id = request_id(&parts.headers).unwrap_or("unknown").to_string();

    let table = state.table.load_full();
    let (route, params) = match table.lookup(&parts.method, parts.uri.path()) {
        RouteMatch::Found { route, params } => (route, params),
        RouteMatch::MethodNotAllowed => {
            tracing::debug!(request_id = %id, path = %parts.uri.path(), "Method not allowed");
            return StatusCode::METHOD_NOT_ALLOWED.into_response();
        }
        RouteMatch::NotFound => {
            tracing::debug!(request_id = %id, path = %parts.uri.path(), "No endpoint matched");
            return (StatusCode::NOT_FOUND, "No matching endpoint").into_response();
        }
    };

    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(request_id = %id, error = %e, "Request body rejected");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let ctx = state
        .root
        .child()
        .with_timeout(route.timeout)
        .with_request_id(id.clone());
    let inbound = backend_request(&parts, body, params);

    let calls = route.backends.iter().map(|backend| {
        let ctx = &ctx;
        let request = inbound.clone();
        async move {
            BackendResult {
                name: &backend.name,
                is_noop: backend.is_noop,
                result: backend.handler.call(ctx, request).await,
            }
        }
    });
    let results = join_all(calls).await;
    let response = response::merge(results);

    tracing::debug!(
        request_id = %id,
        endpoint = %route.pattern.as_str(),
        status = response.status().as_u16(),
        "Request served"
    );
    state.metrics.record_request(
        route.pattern.as_str(),
        parts.method.as_str(),
        response.status().as_u16(),
        start.elapsed(),
    );
    response
}
