//! Backend pipeline gateway library.

// Core subsystems
pub mod config;
pub mod http;
pub mod proxy;
pub mod routing;

// Backend pipeline
pub mod client;
pub mod pipeline;
pub mod transform;

// Backend middleware
pub mod amqp;
pub mod cel;
pub mod circuitbreaker;
pub mod ratelimit;

// Cross-cutting concerns
pub mod observability;

pub use config::GatewayConfig;
pub use http::GatewayServer;
pub use pipeline::{new_backend_factory, PipelineComposer};
