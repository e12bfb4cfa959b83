//! Per-backend rate limiting.
//!
//! A single token bucket guards each backend. Calls over the limit fail
//! fast with [`ProxyError::RateLimited`] and never reach the upstream.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use futures_util::future::BoxFuture;
use serde::Deserialize;

use crate::config::BackendConfig;
use crate::pipeline::BackendLayer;
use crate::proxy::{Context, Proxy, ProxyError, ProxyRef, Request, Response};

pub const NAMESPACE: &str = "qos/ratelimit/proxy";

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained calls per second; zero or less disables the limiter.
    pub max_rate: f64,
    /// Burst size; defaults to `max_rate` (at least 1).
    #[serde(default)]
    pub capacity: Option<u64>,
}

impl RateLimitConfig {
    fn burst(&self) -> f64 {
        self.capacity
            .map(|c| c as f64)
            .unwrap_or(self.max_rate.ceil())
            .max(1.0)
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

/// Token bucket refilled continuously at `refill_rate` tokens per second.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    state: Mutex<Bucket>,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            state: Mutex::new(Bucket {
                tokens: capacity,
                last_update: Instant::now(),
            }),
        }
    }

    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_update).as_secs_f64();

        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.capacity);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

struct RateLimitedProxy {
    backend: String,
    bucket: TokenBucket,
    next: ProxyRef,
}

impl Proxy for RateLimitedProxy {
    fn call<'a>(
        &'a self,
        ctx: &'a Context,
        request: Request,
    ) -> BoxFuture<'a, Result<Response, ProxyError>> {
        Box::pin(async move {
            if !self.bucket.try_acquire() {
                tracing::warn!(backend = %self.backend, "Backend rate limit exceeded");
                return Err(ProxyError::RateLimited {
                    backend: self.backend.clone(),
                });
            }
            self.next.call(ctx, request).await
        })
    }
}

#[derive(Debug, Default)]
pub struct RateLimitLayer;

impl BackendLayer for RateLimitLayer {
    fn name(&self) -> &'static str {
        "ratelimit"
    }

    fn is_active(&self, remote: &BackendConfig) -> bool {
        remote.has_namespace(NAMESPACE)
    }

    fn wrap(&self, remote: &BackendConfig, next: ProxyRef) -> ProxyRef {
        let Some(raw) = remote.extra_config.get(NAMESPACE) else {
            return next;
        };
        match serde_json::from_value::<RateLimitConfig>(raw.clone()) {
            Ok(config) if config.max_rate <= 0.0 => next,
            Ok(config) => Arc::new(RateLimitedProxy {
                backend: remote.name.clone(),
                bucket: TokenBucket::new(config.burst(), config.max_rate),
                next,
            }),
            Err(error) => {
                tracing::error!(
                    backend = %remote.name,
                    %error,
                    "Invalid rate limit config, layer disabled"
                );
                next
            }
        }
    }
}
