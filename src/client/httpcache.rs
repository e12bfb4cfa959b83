//! In-memory HTTP response cache for a backend.
//!
//! # Responsibilities
//! - Serve repeated GET/HEAD calls from memory while fresh
//! - Respect `Cache-Control` on the upstream response
//!
//! # Design Decisions
//! - One cache per backend; keys are method + full URI
//! - `no-store`, `no-cache` and `private` responses are never stored
//! - Freshness comes from `max-age` when present, else `ttl_secs`
//! - When full, expired entries are purged; if still full the response is
//!   simply not cached

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{header, HeaderMap, Method, Request, Response, StatusCode};
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde::Deserialize;
use tokio::time::Instant;

use crate::client::{ExecutorRef, HttpRequestExecutor};
use crate::config::BackendConfig;
use crate::proxy::{Context, ProxyError};

pub const NAMESPACE: &str = "qos/http-cache";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpCacheConfig {
    /// Freshness used when the upstream sends no `max-age`.
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for HttpCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 60,
            max_entries: 1024,
        }
    }
}

/// Executor builder for backends without credentials.
///
/// Returns a caching executor when the backend configures
/// [`NAMESPACE`], the bare transport otherwise.
pub fn new_http_client(remote: &BackendConfig, transport: ExecutorRef) -> ExecutorRef {
    let Some(raw) = remote.extra_config.get(NAMESPACE) else {
        return transport;
    };
    match serde_json::from_value::<HttpCacheConfig>(raw.clone()) {
        Ok(config) => Arc::new(CachedExecutor::new(config, transport)),
        Err(e) => {
            tracing::warn!(
                backend = %remote.name,
                error = %e,
                "Invalid http cache config, caching disabled"
            );
            transport
        }
    }
}

#[derive(Debug, Clone)]
struct CachedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    expires_at: Instant,
}

impl CachedResponse {
    fn to_response(&self) -> Response<Bytes> {
        let mut response = Response::new(self.body.clone());
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }
}

pub struct CachedExecutor {
    config: HttpCacheConfig,
    inner: ExecutorRef,
    entries: DashMap<String, CachedResponse>,
}

impl CachedExecutor {
    pub fn new(config: HttpCacheConfig, inner: ExecutorRef) -> Self {
        Self {
            config,
            inner,
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, key: &str) -> Option<Response<Bytes>> {
        let entry = self.entries.get(key)?;
        if entry.expires_at > Instant::now() {
            return Some(entry.to_response());
        }
        drop(entry);
        self.entries.remove(key);
        None
    }

    fn store(&self, key: String, response: &Response<Bytes>) {
        let Some(ttl) = freshness(response.headers(), self.config.ttl_secs) else {
            return;
        };
        if !is_cacheable_status(response.status()) {
            return;
        }

        if self.entries.len() >= self.config.max_entries {
            let now = Instant::now();
            self.entries.retain(|_, cached| cached.expires_at > now);
            if self.entries.len() >= self.config.max_entries {
                tracing::debug!(entries = self.entries.len(), "Http cache full, skipping store");
                return;
            }
        }

        self.entries.insert(
            key,
            CachedResponse {
                status: response.status(),
                headers: response.headers().clone(),
                body: response.body().clone(),
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

fn is_cacheable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 200 | 203 | 204 | 300 | 301 | 404 | 410)
}

fn is_cacheable_method(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}

fn wants_revalidation(headers: &HeaderMap) -> bool {
    cache_directives(headers).any(|d| d == "no-cache" || d == "no-store")
}

fn cache_directives(headers: &HeaderMap) -> impl Iterator<Item = String> + '_ {
    headers
        .get_all(header::CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|d| d.trim().to_ascii_lowercase())
}

/// How long a response may be served from cache, if at all.
fn freshness(headers: &HeaderMap, default_ttl: u64) -> Option<Duration> {
    let mut ttl = default_ttl;
    for directive in cache_directives(headers) {
        match directive.as_str() {
            "no-store" | "no-cache" | "private" => return None,
            d => {
                if let Some(secs) = d.strip_prefix("max-age=") {
                    ttl = secs.trim_matches('"').parse().ok()?;
                }
            }
        }
    }
    (ttl > 0).then(|| Duration::from_secs(ttl))
}

impl HttpRequestExecutor for CachedExecutor {
    fn execute<'a>(
        &'a self,
        ctx: &'a Context,
        request: Request<Bytes>,
    ) -> BoxFuture<'a, Result<Response<Bytes>, ProxyError>> {
        Box::pin(async move {
            if !is_cacheable_method(request.method()) {
                return self.inner.execute(ctx, request).await;
            }

            let key = format!("{} {}", request.method(), request.uri());
            if !wants_revalidation(request.headers()) {
                if let Some(hit) = self.lookup(&key) {
                    tracing::trace!(key = %key, "Http cache hit");
                    return Ok(hit);
                }
            }

            let response = self.inner.execute(ctx, request).await?;
            self.store(key, &response);
            Ok(response)
        })
    }
}
