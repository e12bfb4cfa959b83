//! Backend pipeline composition.
//!
//! # Data Flow
//! ```text
//! BackendConfig
//!     → executor.rs     (client-credentials | cached client, then traced)
//!     → transform.rs    (optional request/response rewriting)
//!     → materializer.rs (HttpProxy: status classifier + response parser)
//!     → composer.rs     (optional layers, innermost first)
//!     → ProxyRef
//! ```
//!
//! # Design Decisions
//! - Composition is synchronous and performs no I/O
//! - The layer order is a static table, not derived from configuration
//! - Invalid optional configuration disables the layer; it never fails
//!   the build

pub mod composer;
pub mod executor;
pub mod materializer;
pub mod transform;

use crate::config::BackendConfig;
use crate::proxy::ProxyRef;

pub use composer::{new_backend_factory, PipelineComposer};
pub use executor::{client_kind, request_executor, ClientKind};
pub use materializer::materialize;
pub use transform::resolve_transform;

/// One optional middleware around a backend handler.
pub trait BackendLayer: Send + Sync {
    /// Label used in logs and [`PipelineComposer::layer_plan`].
    fn name(&self) -> &'static str;

    /// Whether the layer applies to this backend.
    fn is_active(&self, remote: &BackendConfig) -> bool;

    /// Wrap `next`. Called only when [`is_active`](Self::is_active) holds.
    fn wrap(&self, remote: &BackendConfig, next: ProxyRef) -> ProxyRef;
}
