//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Backend calls produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (per-backend counters and latency histograms)
//!     → tracing.rs (`backend` and `http_client` spans)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through every span
//! - The metrics collector is an injected handle, so tests and disabled
//!   configurations record nothing

pub mod logging;
pub mod metrics;
pub mod tracing;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("failed to initialize logging: {0}")]
    Logging(String),

    #[error("failed to install metrics exporter: {0}")]
    Metrics(String),

    #[error("invalid metrics address '{0}'")]
    InvalidAddress(String),
}

pub use logging::init_logging;
pub use metrics::{init_metrics, MetricsCollector, MetricsLayer};
pub use self::tracing::{TracedExecutor, TracingLayer};
