//! Endpoint lookup.
//!
//! # Responsibilities
//! - Store endpoints with their built backend handlers
//! - Look up the endpoint for a method and path
//! - Distinguish "no such path" from "path exists, wrong method"
//!
//! # Design Decisions
//! - Immutable after construction; a reload builds a new table
//! - Most specific pattern first (more literal segments), config order
//!   breaks ties
//! - O(n) scan (acceptable for typical endpoint counts)

use std::collections::HashMap;
use std::time::Duration;

use axum::http::Method;

use crate::config::{EndpointConfig, GatewayConfig};
use crate::proxy::{BackendFactory, ProxyRef};
use crate::routing::matcher::PathPattern;

/// A built backend of an endpoint.
pub struct BackendRoute {
    pub name: String,
    /// Backend answers are forwarded verbatim.
    pub is_noop: bool,
    pub handler: ProxyRef,
}

pub struct EndpointRoute {
    pub pattern: PathPattern,
    pub method: Method,
    pub timeout: Duration,
    pub backends: Vec<BackendRoute>,
}

impl EndpointRoute {
    fn build(
        endpoint: &EndpointConfig,
        default_timeout: Duration,
        factory: &BackendFactory,
    ) -> Option<Self> {
        let Some(pattern) = PathPattern::parse(&endpoint.endpoint) else {
            tracing::warn!(endpoint = %endpoint.endpoint, "Skipping endpoint with invalid pattern");
            return None;
        };
        let Ok(method) = Method::from_bytes(endpoint.method.to_ascii_uppercase().as_bytes()) else {
            tracing::warn!(
                endpoint = %endpoint.endpoint,
                method = %endpoint.method,
                "Skipping endpoint with invalid method"
            );
            return None;
        };

        let backends = endpoint
            .backends
            .iter()
            .map(|remote| BackendRoute {
                name: remote.name.clone(),
                is_noop: remote.encoding == crate::proxy::encoding::NOOP,
                handler: factory(remote),
            })
            .collect();

        Some(Self {
            pattern,
            method,
            timeout: endpoint
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(default_timeout),
            backends,
        })
    }
}

pub enum RouteMatch<'a> {
    Found {
        route: &'a EndpointRoute,
        params: HashMap<String, String>,
    },
    MethodNotAllowed,
    NotFound,
}

#[derive(Default)]
pub struct EndpointTable {
    routes: Vec<EndpointRoute>,
}

impl EndpointTable {
    /// Build every endpoint of `config`, creating one handler per backend.
    pub fn build(config: &GatewayConfig, factory: &BackendFactory) -> Self {
        let default_timeout = Duration::from_millis(config.timeouts.request_ms);
        let mut routes: Vec<EndpointRoute> = config
            .endpoints
            .iter()
            .filter_map(|endpoint| EndpointRoute::build(endpoint, default_timeout, factory))
            .collect();
        routes.sort_by(|a, b| b.pattern.specificity().cmp(&a.pattern.specificity()));

        tracing::info!(endpoints = routes.len(), "Endpoint table built");
        Self { routes }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn lookup(&self, method: &Method, path: &str) -> RouteMatch<'_> {
        let mut path_matched = false;
        for route in &self.routes {
            if let Some(params) = route.pattern.matches(path) {
                if route.method == *method {
                    return RouteMatch::Found { route, params };
                }
                path_matched = true;
            }
        }
        if path_matched {
            RouteMatch::MethodNotAllowed
        } else {
            RouteMatch::NotFound
        }
    }
}
