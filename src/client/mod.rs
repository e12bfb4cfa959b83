//! Outbound HTTP execution.
//!
//! # Data Flow
//! ```text
//! HttpProxy
//!     → [transform executor]            (pipeline::transform)
//!     → traced executor                 (observability::tracing)
//!     → oauth2.rs  |  httpcache.rs      (one of the two, per backend)
//!     → transport.rs (hyper client)
//! ```
//!
//! # Design Decisions
//! - Executors wrap executors; the transport is shared by every backend
//! - Bodies are buffered; executors see complete requests and responses
//! - Every executor honours the call's `Context`

pub mod httpcache;
pub mod oauth2;
pub mod transport;

use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::http::{Request, Response};
use futures_util::future::BoxFuture;

use crate::proxy::{Context, ProxyError};

/// Performs one outbound HTTP call.
pub trait HttpRequestExecutor: Send + Sync {
    fn execute<'a>(
        &'a self,
        ctx: &'a Context,
        request: Request<Bytes>,
    ) -> BoxFuture<'a, Result<Response<Bytes>, ProxyError>>;
}

pub type ExecutorRef = Arc<dyn HttpRequestExecutor>;

pub use transport::HttpTransport;

/// Adapts an async closure into an [`HttpRequestExecutor`].
pub fn executor_fn<F, Fut>(f: F) -> ExecutorRef
where
    F: Fn(Context, Request<Bytes>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response<Bytes>, ProxyError>> + Send + 'static,
{
    Arc::new(FnExecutor(f))
}

struct FnExecutor<F>(F);

impl<F, Fut> HttpRequestExecutor for FnExecutor<F>
where
    F: Fn(Context, Request<Bytes>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<Bytes>, ProxyError>> + Send + 'static,
{
    fn execute<'a>(
        &'a self,
        ctx: &'a Context,
        request: Request<Bytes>,
    ) -> BoxFuture<'a, Result<Response<Bytes>, ProxyError>> {
        Box::pin((self.0)(ctx.clone(), request))
    }
}
