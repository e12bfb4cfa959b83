//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Opaque per-backend extension configuration, keyed by namespace.
///
/// The composition engine only checks which namespaces are present; each
/// middleware owns the schema of its own blob.
pub type ExtraConfig = BTreeMap<String, serde_json::Value>;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Endpoint definitions, each fanning out to one or more backends.
    pub endpoints: Vec<EndpointConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum accepted inbound body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout for backend calls, in milliseconds.
    pub connect_ms: u64,

    /// Default end-to-end endpoint timeout, in milliseconds.
    pub request_ms: u64,

    /// Maximum backend response body size in bytes.
    pub max_response_bytes: usize,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 2_000,
            request_ms: 3_000,
            max_response_bytes: 8 * 1024 * 1024,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable the metrics collector and endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Record per-backend metrics (the `backend` layer).
    pub backend_metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
            backend_metrics: true,
        }
    }
}

/// A public endpoint exposed by the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    /// Path pattern, with `{param}` segments (e.g., "/users/{id}").
    pub endpoint: String,

    /// HTTP method accepted by the endpoint.
    #[serde(default = "default_method")]
    pub method: String,

    /// Endpoint timeout in milliseconds; falls back to `timeouts.request_ms`.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Backends called for every matching request.
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

/// Backend descriptor: everything the pipeline needs to build one handler.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct BackendConfig {
    /// Backend identity, used for metrics and tracing labels.
    /// Defaults to the URL pattern when left empty.
    #[serde(default)]
    pub name: String,

    /// Upstream hosts (e.g., "http://10.0.0.1:3000").
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Upstream path pattern, with `{param}` placeholders.
    pub url_pattern: String,

    /// Upstream method; empty means "same as the inbound request".
    #[serde(default)]
    pub method: String,

    /// Response encoding (`json`, `safejson`, `string`, `no-op`).
    #[serde(default = "default_encoding")]
    pub encoding: String,

    /// Dot path of the object to extract from the decoded response.
    #[serde(default)]
    pub target: Option<String>,

    /// Fields to keep (dot paths). Takes precedence over `deny`.
    #[serde(default)]
    pub allow: Vec<String>,

    /// Fields to drop (dot paths).
    #[serde(default)]
    pub deny: Vec<String>,

    /// Top-level field renames (`from` -> `to`).
    #[serde(default)]
    pub mapping: BTreeMap<String, String>,

    /// Nest the whole response under this key.
    #[serde(default)]
    pub group: Option<String>,

    /// The upstream returns a JSON array; wrap it under `collection`.
    #[serde(default)]
    pub is_collection: bool,

    /// Namespaced middleware configuration.
    #[serde(default)]
    pub extra_config: ExtraConfig,
}

impl BackendConfig {
    /// Returns true if the given extension namespace is configured.
    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.extra_config.contains_key(namespace)
    }
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_encoding() -> String {
    "json".to_string()
}
