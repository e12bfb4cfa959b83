//! Tracing spans for backend calls.
//!
//! # Responsibilities
//! - Open a `backend` span around every backend handler call
//! - Open an `http_client` span around every outbound HTTP call
//!
//! # Design Decisions
//! - The executor span is entered inside the backend span, so it is its
//!   child in every subscriber
//! - Spans carry the request id from the call context

use std::sync::Arc;

use axum::body::Bytes;
use axum::http::{Request, Response};
use futures_util::future::BoxFuture;
use tracing::{field, Instrument};

use crate::client::{ExecutorRef, HttpRequestExecutor};
use crate::config::BackendConfig;
use crate::pipeline::BackendLayer;
use crate::proxy::{self, Context, Proxy, ProxyError, ProxyRef};

/// Executor wrapper opening an `http_client` span per call.
pub struct TracedExecutor {
    backend: String,
    inner: ExecutorRef,
}

impl TracedExecutor {
    pub fn new(backend: impl Into<String>, inner: ExecutorRef) -> Self {
        Self {
            backend: backend.into(),
            inner,
        }
    }
}

impl HttpRequestExecutor for TracedExecutor {
    fn execute<'a>(
        &'a self,
        ctx: &'a Context,
        request: Request<Bytes>,
    ) -> BoxFuture<'a, Result<Response<Bytes>, ProxyError>> {
        let span = tracing::info_span!(
            "http_client",
            backend = %self.backend,
            request_id = ctx.request_id().unwrap_or_default(),
            method = %request.method(),
            url = %request.uri(),
            status = field::Empty,
            error = field::Empty,
        );
        Box::pin(
            async move {
                let result = self.inner.execute(ctx, request).await;
                let current = tracing::Span::current();
                match &result {
                    Ok(response) => {
                        current.record("status", response.status().as_u16());
                    }
                    Err(e) => {
                        current.record("error", field::display(e));
                    }
                }
                result
            }
            .instrument(span),
        )
    }
}

struct TracedProxy {
    backend: String,
    next: ProxyRef,
}

impl Proxy for TracedProxy {
    fn call<'a>(
        &'a self,
        ctx: &'a Context,
        request: proxy::Request,
    ) -> BoxFuture<'a, Result<proxy::Response, ProxyError>> {
        let span = tracing::info_span!(
            "backend",
            backend = %self.backend,
            request_id = ctx.request_id().unwrap_or_default(),
            complete = field::Empty,
            error = field::Empty,
        );
        Box::pin(
            async move {
                let result = self.next.call(ctx, request).await;
                let current = tracing::Span::current();
                match &result {
                    Ok(response) => {
                        current.record("complete", response.is_complete);
                    }
                    Err(e) => {
                        current.record("error", e.kind());
                        tracing::debug!(error = %e, "Backend call failed");
                    }
                }
                result
            }
            .instrument(span),
        )
    }
}

/// Outermost pipeline layer; always active.
#[derive(Debug, Default)]
pub struct TracingLayer;

impl BackendLayer for TracingLayer {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn is_active(&self, _remote: &BackendConfig) -> bool {
        true
    }

    fn wrap(&self, remote: &BackendConfig, next: ProxyRef) -> ProxyRef {
        Arc::new(TracedProxy {
            backend: remote.name.clone(),
            next,
        })
    }
}
