//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Fill derived defaults (backend names)
//! - Validate value ranges and referential shapes (hosts, methods, patterns)
//! - Detect conflicting endpoints
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Middleware namespaces are NOT validated here; an invalid optional
//!   middleware degrades at pipeline construction instead of rejecting the file

use std::collections::HashSet;

use axum::http::Method;
use thiserror::Error;
use url::Url;

use crate::config::schema::GatewayConfig;
use crate::proxy::encoding::Decoder;
use crate::routing::matcher::PathPattern;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("endpoint #{index} has an invalid path pattern {pattern:?}")]
    InvalidPattern { index: usize, pattern: String },

    #[error("endpoint {endpoint}: invalid method {method:?}")]
    InvalidMethod { endpoint: String, method: String },

    #[error("endpoint {method} {endpoint} is declared more than once")]
    DuplicateEndpoint { method: String, endpoint: String },

    #[error("endpoint {endpoint} has no backends")]
    NoBackends { endpoint: String },

    #[error("endpoint {endpoint}: timeout must be greater than zero")]
    ZeroTimeout { endpoint: String },

    #[error("backend {backend} of {endpoint} has no hosts")]
    NoHosts { endpoint: String, backend: String },

    #[error("backend {backend} of {endpoint}: invalid host {host:?}")]
    InvalidHost {
        endpoint: String,
        backend: String,
        host: String,
    },

    #[error("backend {backend} of {endpoint}: url_pattern must start with '/'")]
    InvalidUrlPattern { endpoint: String, backend: String },

    #[error("backend {backend} of {endpoint}: unknown encoding {encoding:?}")]
    UnknownEncoding {
        endpoint: String,
        backend: String,
        encoding: String,
    },
}

/// Fill derived defaults that later stages rely on.
pub fn normalize_config(config: &mut GatewayConfig) {
    for endpoint in &mut config.endpoints {
        endpoint.method = endpoint.method.to_ascii_uppercase();
        for backend in &mut endpoint.backends {
            if backend.name.is_empty() {
                backend.name = backend.url_pattern.clone();
            }
            backend.method = backend.method.to_ascii_uppercase();
        }
    }
}

/// Validate a configuration, collecting every error found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for (index, endpoint) in config.endpoints.iter().enumerate() {
        let name = endpoint.endpoint.clone();

        if PathPattern::parse(&endpoint.endpoint).is_none() {
            errors.push(ValidationError::InvalidPattern {
                index,
                pattern: name.clone(),
            });
        }

        if Method::from_bytes(endpoint.method.as_bytes()).is_err() {
            errors.push(ValidationError::InvalidMethod {
                endpoint: name.clone(),
                method: endpoint.method.clone(),
            });
        }

        if !seen.insert((endpoint.method.to_ascii_uppercase(), name.clone())) {
            errors.push(ValidationError::DuplicateEndpoint {
                method: endpoint.method.clone(),
                endpoint: name.clone(),
            });
        }

        if endpoint.timeout_ms == Some(0) {
            errors.push(ValidationError::ZeroTimeout {
                endpoint: name.clone(),
            });
        }

        if endpoint.backends.is_empty() {
            errors.push(ValidationError::NoBackends {
                endpoint: name.clone(),
            });
        }

        for backend in &endpoint.backends {
            let backend_name = if backend.name.is_empty() {
                backend.url_pattern.clone()
            } else {
                backend.name.clone()
            };

            // Queue consumers never reach an upstream host.
            let needs_hosts = !backend.has_namespace(crate::amqp::CONSUMER_NAMESPACE)
                && !backend.has_namespace(crate::amqp::PRODUCER_NAMESPACE);
            if needs_hosts && backend.hosts.is_empty() {
                errors.push(ValidationError::NoHosts {
                    endpoint: name.clone(),
                    backend: backend_name.clone(),
                });
            }

            for host in &backend.hosts {
                if Url::parse(&crate::proxy::balancer::normalize_host(host)).is_err() {
                    errors.push(ValidationError::InvalidHost {
                        endpoint: name.clone(),
                        backend: backend_name.clone(),
                        host: host.clone(),
                    });
                }
            }

            if !backend.url_pattern.starts_with('/') {
                errors.push(ValidationError::InvalidUrlPattern {
                    endpoint: name.clone(),
                    backend: backend_name.clone(),
                });
            }

            if Decoder::from_encoding(&backend.encoding).is_none() {
                errors.push(ValidationError::UnknownEncoding {
                    endpoint: name.clone(),
                    backend: backend_name.clone(),
                    encoding: backend.encoding.clone(),
                });
            }

            if !backend.method.is_empty()
                && Method::from_bytes(backend.method.as_bytes()).is_err()
            {
                errors.push(ValidationError::InvalidMethod {
                    endpoint: format!("{name} -> {backend_name}"),
                    method: backend.method.clone(),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{BackendConfig, EndpointConfig};

    fn endpoint(path: &str, backends: Vec<BackendConfig>) -> EndpointConfig {
        EndpointConfig {
            endpoint: path.into(),
            method: "GET".into(),
            timeout_ms: None,
            backends,
        }
    }

    fn backend(host: &str, pattern: &str) -> BackendConfig {
        BackendConfig {
            hosts: vec![host.into()],
            url_pattern: pattern.into(),
            encoding: "json".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config() {
        let mut config = GatewayConfig::default();
        config
            .endpoints
            .push(endpoint("/users/{id}", vec![backend("http://127.0.0.1:3000", "/u/{id}")]));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = GatewayConfig::default();
        let mut bad = backend("http://127.0.0.1:3000", "no-slash");
        bad.encoding = "yaml".into();
        config.endpoints.push(endpoint("/a", vec![bad]));
        config.endpoints.push(endpoint("/a", vec![]));

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::NoBackends {
            endpoint: "/a".into()
        }));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::DuplicateEndpoint { .. })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::UnknownEncoding { .. })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidUrlPattern { .. })));
    }

    #[test]
    fn test_queue_consumer_needs_no_hosts() {
        let mut config = GatewayConfig::default();
        let mut consumer = backend("http://unused", "/queue");
        consumer.hosts.clear();
        consumer.extra_config.insert(
            crate::amqp::CONSUMER_NAMESPACE.into(),
            serde_json::json!({"name": "q", "exchange": "ex", "routing_key": ["k"]}),
        );
        config.endpoints.push(endpoint("/q", vec![consumer]));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_normalize_fills_names() {
        let mut config = GatewayConfig::default();
        let mut b = backend("http://127.0.0.1:3000", "/u/{id}");
        b.method = "post".into();
        config.endpoints.push(endpoint("/users/{id}", vec![b]));
        normalize_config(&mut config);
        let b = &config.endpoints[0].backends[0];
        assert_eq!(b.name, "/u/{id}");
        assert_eq!(b.method, "POST");
    }
}
