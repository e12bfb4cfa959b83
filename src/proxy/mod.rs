//! Backend proxy subsystem.
//!
//! # Data Flow
//! ```text
//! proxy::Request (rendered by the router)
//!     → http.rs (build outbound request, pick host via balancer.rs)
//!     → request executor (client::*)
//!     → status.rs (classify status code)
//!     → parser.rs (encoding.rs decode + formatter.rs shape)
//!     → proxy::Response
//! ```
//!
//! # Design Decisions
//! - A `Proxy` is the unit every middleware wraps; all of them share one
//!   signature so layers compose in any order the pipeline chooses
//! - Bodies are fully buffered (`Bytes`) on both sides
//! - Errors are a single enum; layers never rewrite each other's kinds

pub mod balancer;
pub mod context;
pub mod encoding;
pub mod error;
pub mod formatter;
pub mod http;
pub mod parser;
pub mod status;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::http::{HeaderMap, Method};
use futures_util::future::BoxFuture;
use serde_json::{Map, Value};

use crate::config::BackendConfig;

pub use context::Context;
pub use error::ProxyError;

/// Inbound request, as handed to a backend handler.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: Method,
    /// Inbound path; the backend renders its own `url_pattern` from `params`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub params: HashMap<String, String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Status and headers reported by the upstream.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub status_code: u16,
    pub headers: HeaderMap,
}

/// Result of one backend call.
#[derive(Debug, Clone, Default)]
pub struct Response {
    /// Decoded and formatted entity.
    pub data: Map<String, Value>,
    pub is_complete: bool,
    pub metadata: Metadata,
    /// Raw upstream body, only set when no decoding was applied.
    pub body: Option<Bytes>,
}

/// A ready-to-call backend handler.
pub trait Proxy: Send + Sync {
    fn call<'a>(
        &'a self,
        ctx: &'a Context,
        request: Request,
    ) -> BoxFuture<'a, Result<Response, ProxyError>>;
}

pub type ProxyRef = Arc<dyn Proxy>;

/// Builds one handler per backend descriptor.
pub type BackendFactory = Arc<dyn Fn(&BackendConfig) -> ProxyRef + Send + Sync>;

/// Adapts an async closure into a [`Proxy`].
pub fn proxy_fn<F, Fut>(f: F) -> ProxyRef
where
    F: Fn(Context, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, ProxyError>> + Send + 'static,
{
    Arc::new(FnProxy(f))
}

struct FnProxy<F>(F);

impl<F, Fut> Proxy for FnProxy<F>
where
    F: Fn(Context, Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, ProxyError>> + Send + 'static,
{
    fn call<'a>(
        &'a self,
        ctx: &'a Context,
        request: Request,
    ) -> BoxFuture<'a, Result<Response, ProxyError>> {
        Box::pin((self.0)(ctx.clone(), request))
    }
}
