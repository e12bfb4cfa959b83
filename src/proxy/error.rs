//! Errors surfaced by backend handlers.

use axum::http::StatusCode;
use thiserror::Error;

/// Errors a backend call can end with.
///
/// Middleware-owned kinds (breaker, limiter, queue, expression) are created
/// by their layer and passed through every other layer untouched.
#[derive(Debug, Clone, Error)]
pub enum ProxyError {
    /// The upstream answered with a status outside the allow-list.
    #[error("invalid status code: {status}")]
    InvalidStatusCode { status: u16 },

    /// The upstream body could not be decoded with the declared encoding.
    #[error("decode error: {0}")]
    Decode(String),

    /// The outbound request could not be built.
    #[error("invalid backend request: {0}")]
    InvalidRequest(String),

    /// Connection or protocol failure talking to the upstream.
    #[error("transport error: {0}")]
    Transport(String),

    /// Credentials could not be obtained for the upstream.
    #[error("authentication error: {0}")]
    Auth(String),

    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("circuit breaker is open for backend {backend}")]
    CircuitOpen { backend: String },

    #[error("rate limit exceeded for backend {backend}")]
    RateLimited { backend: String },

    #[error("queue error: {0}")]
    Queue(String),

    /// An expression evaluated to false.
    #[error("{stage} rejected by expression {expression:?}")]
    ExpressionRejected {
        stage: &'static str,
        expression: String,
    },

    /// An expression failed to evaluate.
    #[error("expression error: {0}")]
    Expression(String),
}

impl ProxyError {
    /// Status code the gateway answers with when this error ends a call.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Cancelled | ProxyError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::CircuitOpen { .. } | ProxyError::RateLimited { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ProxyError::ExpressionRejected { .. } => StatusCode::BAD_REQUEST,
            ProxyError::InvalidStatusCode { .. }
            | ProxyError::Decode(_)
            | ProxyError::Transport(_)
            | ProxyError::Auth(_) => StatusCode::BAD_GATEWAY,
            ProxyError::InvalidRequest(_) | ProxyError::Queue(_) | ProxyError::Expression(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::InvalidStatusCode { .. } => "invalid_status",
            ProxyError::Decode(_) => "decode",
            ProxyError::InvalidRequest(_) => "invalid_request",
            ProxyError::Transport(_) => "transport",
            ProxyError::Auth(_) => "auth",
            ProxyError::Cancelled => "cancelled",
            ProxyError::DeadlineExceeded => "deadline",
            ProxyError::CircuitOpen { .. } => "circuit_open",
            ProxyError::RateLimited { .. } => "rate_limited",
            ProxyError::Queue(_) => "queue",
            ProxyError::ExpressionRejected { .. } => "expression_rejected",
            ProxyError::Expression(_) => "expression",
        }
    }
}
