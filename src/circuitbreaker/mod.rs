//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: backend assumed down, requests fail fast
//! - Half-Open: testing if backend recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: more than max_errors consecutive failures within interval
//! Open → Half-Open: after timeout
//! Half-Open → Closed: probe request succeeds
//! Half-Open → Open: probe request fails
//! ```
//!
//! # Design Decisions
//! - Per-backend circuit breaker (not global)
//! - Fail fast in Open state (no waiting for timeout)
//! - Single probe in Half-Open (prevents hammering recovering backend)
//! - Every error counts as a failure, including middleware rejections
//!   raised further in
//! - A probe dropped before completing counts as a failure

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Deserialize;
use tokio::time::Instant;

use crate::config::BackendConfig;
use crate::pipeline::BackendLayer;
use crate::proxy::{Context, Proxy, ProxyError, ProxyRef, Request, Response};

pub const NAMESPACE: &str = "qos/circuit-breaker";

#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failure counting window, in seconds.
    pub interval: u64,
    /// Time spent open before probing, in seconds.
    pub timeout: u64,
    /// Consecutive failures tolerated before opening.
    pub max_errors: u32,
    #[serde(default)]
    pub log_status_change: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: State,
    failures: u32,
    window_start: Instant,
    opened_at: Instant,
    probe_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    interval: Duration,
    timeout: Duration,
    max_errors: u32,
    log_status_change: bool,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        let now = Instant::now();
        Self {
            name: name.into(),
            interval: Duration::from_secs(config.interval),
            timeout: Duration::from_secs(config.timeout),
            max_errors: config.max_errors,
            log_status_change: config.log_status_change,
            inner: Mutex::new(Inner {
                state: State::Closed,
                failures: 0,
                window_start: now,
                opened_at: now,
                probe_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> State {
        self.lock().state
    }

    fn transition(&self, inner: &mut Inner, to: State) {
        if inner.state == to {
            return;
        }
        if self.log_status_change {
            tracing::warn!(backend = %self.name, from = ?inner.state, ?to, "Circuit state change");
        } else {
            tracing::debug!(backend = %self.name, from = ?inner.state, ?to, "Circuit state change");
        }
        inner.state = to;
        match to {
            State::Closed => {
                inner.failures = 0;
                inner.window_start = Instant::now();
            }
            State::Open => inner.opened_at = Instant::now(),
            State::HalfOpen => {}
        }
        inner.probe_in_flight = false;
    }

    /// Ask to let one call through.
    pub fn acquire(&self) -> Option<Permit<'_>> {
        let mut inner = self.lock();
        if inner.state == State::Open && inner.opened_at.elapsed() >= self.timeout {
            self.transition(&mut inner, State::HalfOpen);
        }
        match inner.state {
            State::Closed => Some(Permit {
                breaker: self,
                probe: false,
                recorded: false,
            }),
            State::HalfOpen if !inner.probe_in_flight => {
                inner.probe_in_flight = true;
                Some(Permit {
                    breaker: self,
                    probe: true,
                    recorded: false,
                })
            }
            _ => None,
        }
    }

    fn on_success(&self, probe: bool) {
        let mut inner = self.lock();
        match inner.state {
            State::HalfOpen if probe => self.transition(&mut inner, State::Closed),
            State::Closed => inner.failures = 0,
            _ => {}
        }
    }

    fn on_failure(&self, probe: bool) {
        let mut inner = self.lock();
        match inner.state {
            State::HalfOpen if probe => self.transition(&mut inner, State::Open),
            State::Closed => {
                // A zero interval never clears the count while closed.
                if !self.interval.is_zero() && inner.window_start.elapsed() >= self.interval {
                    inner.failures = 0;
                    inner.window_start = Instant::now();
                }
                inner.failures += 1;
                if inner.failures > self.max_errors {
                    self.transition(&mut inner, State::Open);
                }
            }
            _ => {}
        }
    }
}

/// Admission to call the backend. Must be resolved with
/// [`record`](Permit::record); dropping it unresolved counts as a failure.
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    recorded: bool,
}

impl Permit<'_> {
    pub fn record(mut self, success: bool) {
        self.recorded = true;
        if success {
            self.breaker.on_success(self.probe);
        } else {
            self.breaker.on_failure(self.probe);
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.recorded {
            self.breaker.on_failure(self.probe);
        }
    }
}

struct CircuitBreakerProxy {
    breaker: CircuitBreaker,
    next: ProxyRef,
}

impl Proxy for CircuitBreakerProxy {
    fn call<'a>(
        &'a self,
        ctx: &'a Context,
        request: Request,
    ) -> BoxFuture<'a, Result<Response, ProxyError>> {
        Box::pin(async move {
            let Some(permit) = self.breaker.acquire() else {
                return Err(ProxyError::CircuitOpen {
                    backend: self.breaker.name.clone(),
                });
            };
            let result = self.next.call(ctx, request).await;
            permit.record(result.is_ok());
            result
        })
    }
}

#[derive(Debug, Default)]
pub struct CircuitBreakerLayer;

impl BackendLayer for CircuitBreakerLayer {
    fn name(&self) -> &'static str {
        "circuitbreaker"
    }

    fn is_active(&self, remote: &BackendConfig) -> bool {
        remote.has_namespace(NAMESPACE)
    }

    fn wrap(&self, remote: &BackendConfig, next: ProxyRef) -> ProxyRef {
        let Some(raw) = remote.extra_config.get(NAMESPACE) else {
            return next;
        };
        match serde_json::from_value::<CircuitBreakerConfig>(raw.clone()) {
            Ok(config) => Arc::new(CircuitBreakerProxy {
                breaker: CircuitBreaker::new(remote.name.clone(), &config),
                next,
            }),
            Err(error) => {
                tracing::error!(
                    backend = %remote.name,
                    %error,
                    "Invalid circuit breaker config, layer disabled"
                );
                next
            }
        }
    }
}
