//! The shared hyper-based transport every backend executor ends in.

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{Request, Response};
use futures_util::future::BoxFuture;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::client::HttpRequestExecutor;
use crate::config::TimeoutConfig;
use crate::proxy::{Context, ProxyError};

/// Plain HTTP/1.1 + HTTP/2 client with pooled connections.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client<HttpConnector, Body>,
    max_response_bytes: usize,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration, max_response_bytes: usize) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self {
            client,
            max_response_bytes,
        }
    }

    pub fn from_config(config: &TimeoutConfig) -> Self {
        Self::new(
            Duration::from_millis(config.connect_ms),
            config.max_response_bytes,
        )
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::from_config(&TimeoutConfig::default())
    }
}

impl HttpRequestExecutor for HttpTransport {
    fn execute<'a>(
        &'a self,
        ctx: &'a Context,
        request: Request<Bytes>,
    ) -> BoxFuture<'a, Result<Response<Bytes>, ProxyError>> {
        Box::pin(ctx.run(async move {
            let response = self
                .client
                .request(request.map(Body::from))
                .await
                .map_err(|e| ProxyError::Transport(e.to_string()))?;

            let (parts, body) = response.into_parts();
            let body = axum::body::to_bytes(Body::new(body), self.max_response_bytes)
                .await
                .map_err(|e| ProxyError::Transport(format!("reading body: {e}")))?;

            Ok(Response::from_parts(parts, body))
        }))
    }
}
