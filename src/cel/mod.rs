//! Expression filter around a backend.
//!
//! # Responsibilities
//! - Reject requests whose expressions evaluate to false before the call
//! - Reject responses whose expressions evaluate to false after the call
//!
//! # Design Decisions
//! - Expressions use the minijinja expression language
//! - An expression referencing `resp_` is a response check, anything else
//!   is a request check
//! - Expressions are validated when the pipeline is built; one that does
//!   not compile disables the whole layer
//! - Evaluation is fuel-limited

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::HeaderMap;
use futures_util::future::BoxFuture;
use minijinja::Environment;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::BackendConfig;
use crate::pipeline::BackendLayer;
use crate::proxy::{Context, Proxy, ProxyError, ProxyRef, Request, Response};

pub const NAMESPACE: &str = "validation/cel";

const FUEL_LIMIT: u64 = 10_000;
const RESPONSE_PREFIX: &str = "resp_";

#[derive(Debug, Clone, Deserialize)]
pub struct ExpressionConfig {
    pub check_expr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Request,
    Response,
}

impl Stage {
    fn of(expression: &str) -> Self {
        if expression.contains(RESPONSE_PREFIX) {
            Stage::Response
        } else {
            Stage::Request
        }
    }

    fn label(self) -> &'static str {
        match self {
            Stage::Request => "request",
            Stage::Response => "response",
        }
    }
}

const PASS: &str = "1";

/// Validated checks of one backend, compiled once into an environment.
///
/// Each check is stored as a template named after its expression that
/// renders `1` when the expression is truthy.
pub struct ExpressionFilter {
    env: Environment<'static>,
    request: Vec<String>,
    response: Vec<String>,
}

impl ExpressionFilter {
    /// Compile every expression. Fails on the first one that does not parse.
    pub fn new(configs: &[ExpressionConfig]) -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.set_fuel(Some(FUEL_LIMIT));
        let mut request = Vec::new();
        let mut response = Vec::new();
        for config in configs {
            let expression = config.check_expr.clone();
            env.compile_expression_owned(expression.clone())?;
            env.add_template_owned(
                expression.clone(),
                format!("{{% if {expression} %}}{PASS}{{% endif %}}"),
            )?;
            match Stage::of(&expression) {
                Stage::Request => request.push(expression),
                Stage::Response => response.push(expression),
            }
        }
        Ok(Self {
            env,
            request,
            response,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.request.is_empty() && self.response.is_empty()
    }

    fn check(&self, stage: Stage, vars: &Value) -> Result<(), ProxyError> {
        let expressions = match stage {
            Stage::Request => &self.request,
            Stage::Response => &self.response,
        };
        for expression in expressions {
            let rendered = self
                .env
                .get_template(expression)
                .and_then(|template| template.render(vars))
                .map_err(|e| ProxyError::Expression(format!("{expression}: {e}")))?;
            if rendered != PASS {
                return Err(ProxyError::ExpressionRejected {
                    stage: stage.label(),
                    expression: expression.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn check_request(&self, request: &Request) -> Result<(), ProxyError> {
        if self.request.is_empty() {
            return Ok(());
        }
        let mut query: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (key, value) in &request.query {
            query.entry(key.as_str()).or_default().push(value.as_str());
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let vars = json!({
            "req_method": request.method.as_str(),
            "req_path": request.path,
            "req_params": request.params,
            "req_headers": headers_value(&request.headers),
            "req_query": query,
            "now": now,
        });
        self.check(Stage::Request, &vars)
    }

    pub fn check_response(&self, response: &Response) -> Result<(), ProxyError> {
        if self.response.is_empty() {
            return Ok(());
        }
        let vars = json!({
            "resp_data": response.data,
            "resp_completed": response.is_complete,
            "resp_status": response.metadata.status_code,
            "resp_headers": headers_value(&response.metadata.headers),
        });
        self.check(Stage::Response, &vars)
    }
}

/// Header names mapped to every value they carry.
fn headers_value(headers: &HeaderMap) -> Value {
    let mut out: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            out.entry(name.as_str()).or_default().push(value);
        }
    }
    json!(out)
}

struct ExpressionProxy {
    filter: ExpressionFilter,
    next: ProxyRef,
}

impl Proxy for ExpressionProxy {
    fn call<'a>(
        &'a self,
        ctx: &'a Context,
        request: Request,
    ) -> BoxFuture<'a, Result<Response, ProxyError>> {
        Box::pin(async move {
            self.filter.check_request(&request)?;
            let response = self.next.call(ctx, request).await?;
            self.filter.check_response(&response)?;
            Ok(response)
        })
    }
}

#[derive(Debug, Default)]
pub struct ExpressionLayer;

impl BackendLayer for ExpressionLayer {
    fn name(&self) -> &'static str {
        "cel"
    }

    fn is_active(&self, remote: &BackendConfig) -> bool {
        remote.has_namespace(NAMESPACE)
    }

    fn wrap(&self, remote: &BackendConfig, next: ProxyRef) -> ProxyRef {
        let Some(raw) = remote.extra_config.get(NAMESPACE) else {
            return next;
        };
        let filter = serde_json::from_value::<Vec<ExpressionConfig>>(raw.clone())
            .map_err(|e| e.to_string())
            .and_then(|configs| ExpressionFilter::new(&configs).map_err(|e| e.to_string()));
        match filter {
            Ok(filter) if filter.is_empty() => next,
            Ok(filter) => Arc::new(ExpressionProxy { filter, next }),
            Err(error) => {
                tracing::error!(
                    backend = %remote.name,
                    %error,
                    "Invalid expression config, layer disabled"
                );
                next
            }
        }
    }
}
