//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, timeout, endpoint lookup)
//!     → request.rs (buffer body, build the backend request)
//!     → [every backend handler of the endpoint, concurrently]
//!     → response.rs (merge results, map errors to statuses)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use response::X_GATEWAY_COMPLETED;
pub use server::GatewayServer;
