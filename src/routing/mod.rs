//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path)
//!     → router.rs (endpoint lookup)
//!     → matcher.rs (pattern match, param extraction)
//!     → Return: matched endpoint + params, wrong method, or no match
//!
//! Table Compilation (startup and every reload):
//!     EndpointConfig[]
//!     → Parse patterns
//!     → Build one handler per backend (pipeline composer)
//!     → Sort by specificity
//!     → Freeze as immutable EndpointTable
//! ```
//!
//! # Design Decisions
//! - Tables are immutable at runtime; reloads swap the whole table
//! - Deterministic: same input always matches same endpoint

pub mod matcher;
pub mod router;

pub use matcher::PathPattern;
pub use router::{BackendRoute, EndpointRoute, EndpointTable, RouteMatch};
