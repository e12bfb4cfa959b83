//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (normalize, semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → pipeline composer builds one handler per backend
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server rebuilds handlers and swaps its endpoint table
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - `extra_config` blobs are opaque here; each middleware parses its own

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::{
    BackendConfig, EndpointConfig, ExtraConfig, GatewayConfig, ListenerConfig, LogFormat,
    ObservabilityConfig, TimeoutConfig,
};
