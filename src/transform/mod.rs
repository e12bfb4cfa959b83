//! Declarative request/response rewriting for a backend.
//!
//! # Responsibilities
//! - Parse the `modifier/transform` blob into a validated [`TransformRule`]
//! - Rewrite the outbound request before it reaches the executor
//! - Rewrite the upstream response before it reaches the parser
//!
//! # Design Decisions
//! - Every header name, header value and status code is checked while
//!   parsing, so applying a rule never fails
//! - Modifiers run in the order they are listed

mod executor;

use axum::body::Bytes;
use axum::http::{HeaderName, HeaderValue, Request, Response, StatusCode, Uri};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::config::ExtraConfig;

pub use executor::TransformExecutor;

pub const NAMESPACE: &str = "modifier/transform";

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("malformed transform config: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid header name '{0}'")]
    InvalidHeaderName(String),

    #[error("invalid value for header '{0}'")]
    InvalidHeaderValue(String),

    #[error("invalid status code {0}")]
    InvalidStatus(u16),

    #[error("invalid path '{0}': must start with '/'")]
    InvalidPath(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRule {
    #[serde(default)]
    request: Vec<RawRequestModifier>,
    #[serde(default)]
    response: Vec<RawResponseModifier>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RawRequestModifier {
    #[serde(rename = "header.set")]
    HeaderSet { name: String, value: String },
    #[serde(rename = "header.remove")]
    HeaderRemove { name: String },
    #[serde(rename = "query.set")]
    QuerySet { key: String, value: String },
    #[serde(rename = "query.remove")]
    QueryRemove { key: String },
    #[serde(rename = "path.set")]
    PathSet { path: String },
    #[serde(rename = "body.set")]
    BodySet { body: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RawResponseModifier {
    #[serde(rename = "header.set")]
    HeaderSet { name: String, value: String },
    #[serde(rename = "header.remove")]
    HeaderRemove { name: String },
    #[serde(rename = "status.set")]
    StatusSet { status: u16 },
    #[serde(rename = "body.set")]
    BodySet { body: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestModifier {
    SetHeader(HeaderName, HeaderValue),
    RemoveHeader(HeaderName),
    SetQuery(String, String),
    RemoveQuery(String),
    SetPath(String),
    SetBody(Bytes),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseModifier {
    SetHeader(HeaderName, HeaderValue),
    RemoveHeader(HeaderName),
    SetStatus(StatusCode),
    SetBody(Bytes),
}

/// A validated set of modifiers for one backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformRule {
    pub request: Vec<RequestModifier>,
    pub response: Vec<ResponseModifier>,
}

fn header_name(name: &str) -> Result<HeaderName, TransformError> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| TransformError::InvalidHeaderName(name.to_string()))
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, TransformError> {
    HeaderValue::from_str(value).map_err(|_| TransformError::InvalidHeaderValue(name.to_string()))
}

impl TryFrom<RawRequestModifier> for RequestModifier {
    type Error = TransformError;

    fn try_from(raw: RawRequestModifier) -> Result<Self, Self::Error> {
        Ok(match raw {
            RawRequestModifier::HeaderSet { name, value } => {
                RequestModifier::SetHeader(header_name(&name)?, header_value(&name, &value)?)
            }
            RawRequestModifier::HeaderRemove { name } => {
                RequestModifier::RemoveHeader(header_name(&name)?)
            }
            RawRequestModifier::QuerySet { key, value } => RequestModifier::SetQuery(key, value),
            RawRequestModifier::QueryRemove { key } => RequestModifier::RemoveQuery(key),
            RawRequestModifier::PathSet { path } => {
                if !path.starts_with('/') {
                    return Err(TransformError::InvalidPath(path));
                }
                RequestModifier::SetPath(path)
            }
            RawRequestModifier::BodySet { body } => RequestModifier::SetBody(Bytes::from(body)),
        })
    }
}

impl TryFrom<RawResponseModifier> for ResponseModifier {
    type Error = TransformError;

    fn try_from(raw: RawResponseModifier) -> Result<Self, Self::Error> {
        Ok(match raw {
            RawResponseModifier::HeaderSet { name, value } => {
                ResponseModifier::SetHeader(header_name(&name)?, header_value(&name, &value)?)
            }
            RawResponseModifier::HeaderRemove { name } => {
                ResponseModifier::RemoveHeader(header_name(&name)?)
            }
            RawResponseModifier::StatusSet { status } => ResponseModifier::SetStatus(
                StatusCode::from_u16(status).map_err(|_| TransformError::InvalidStatus(status))?,
            ),
            RawResponseModifier::BodySet { body } => ResponseModifier::SetBody(Bytes::from(body)),
        })
    }
}

/// Look up and validate the transform rule of a backend.
///
/// `Ok(None)` when the namespace is absent or lists no modifiers.
pub fn config_getter(extra: &ExtraConfig) -> Result<Option<TransformRule>, TransformError> {
    let Some(raw) = extra.get(NAMESPACE) else {
        return Ok(None);
    };
    let raw: RawRule = serde_json::from_value(raw.clone())?;

    let rule = TransformRule {
        request: raw
            .request
            .into_iter()
            .map(RequestModifier::try_from)
            .collect::<Result<_, _>>()?,
        response: raw
            .response
            .into_iter()
            .map(ResponseModifier::try_from)
            .collect::<Result<_, _>>()?,
    };

    Ok((!rule.is_empty()).then_some(rule))
}

impl TransformRule {
    pub fn is_empty(&self) -> bool {
        self.request.is_empty() && self.response.is_empty()
    }

    pub fn modify_request(&self, request: &mut Request<Bytes>) {
        let mut url = None;
        for modifier in &self.request {
            match modifier {
                RequestModifier::SetHeader(name, value) => {
                    request.headers_mut().insert(name.clone(), value.clone());
                }
                RequestModifier::RemoveHeader(name) => {
                    request.headers_mut().remove(name);
                }
                RequestModifier::SetBody(body) => *request.body_mut() = body.clone(),
                uri_modifier => {
                    let parsed =
                        url.get_or_insert_with(|| Url::parse(&request.uri().to_string()).ok());
                    let Some(url) = parsed else {
                        tracing::debug!(
                            uri = %request.uri(),
                            "Outbound uri is not absolute, skipping uri modifier"
                        );
                        continue;
                    };
                    apply_uri_modifier(url, uri_modifier);
                }
            }
        }

        if let Some(Some(url)) = url {
            match url.as_str().parse::<Uri>() {
                Ok(uri) => *request.uri_mut() = uri,
                Err(e) => tracing::warn!(url = %url, error = %e, "Rewritten uri is invalid"),
            }
        }
    }

    pub fn modify_response(&self, response: &mut Response<Bytes>) {
        for modifier in &self.response {
            match modifier {
                ResponseModifier::SetHeader(name, value) => {
                    response.headers_mut().insert(name.clone(), value.clone());
                }
                ResponseModifier::RemoveHeader(name) => {
                    response.headers_mut().remove(name);
                }
                ResponseModifier::SetStatus(status) => *response.status_mut() = *status,
                ResponseModifier::SetBody(body) => *response.body_mut() = body.clone(),
            }
        }
    }
}

fn apply_uri_modifier(url: &mut Url, modifier: &RequestModifier) {
    match modifier {
        RequestModifier::SetPath(path) => url.set_path(path),
        RequestModifier::SetQuery(key, value) => {
            let mut pairs = retained_pairs(url, key);
            pairs.push((key.clone(), value.clone()));
            replace_query(url, pairs);
        }
        RequestModifier::RemoveQuery(key) => {
            let pairs = retained_pairs(url, key);
            replace_query(url, pairs);
        }
        _ => {}
    }
}

fn retained_pairs(url: &Url, key: &str) -> Vec<(String, String)> {
    url.query_pairs()
        .filter(|(k, _)| k != key)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn replace_query(url: &mut Url, pairs: Vec<(String, String)>) {
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extra(value: serde_json::Value) -> ExtraConfig {
        let mut extra = ExtraConfig::new();
        extra.insert(NAMESPACE.into(), value);
        extra
    }

    #[test]
    fn test_absent_and_empty() {
        assert!(config_getter(&ExtraConfig::new()).unwrap().is_none());
        assert!(config_getter(&extra(json!({}))).unwrap().is_none());
        assert!(config_getter(&extra(json!({"request": [], "response": []})))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_invalid_configs() {
        assert!(matches!(
            config_getter(&extra(json!("not an object"))),
            Err(TransformError::Malformed(_))
        ));
        assert!(matches!(
            config_getter(&extra(json!({"request": [{"type": "header.explode"}]}))),
            Err(TransformError::Malformed(_))
        ));
        assert!(matches!(
            config_getter(&extra(json!({
                "request": [{"type": "header.set", "name": "bad name", "value": "x"}]
            }))),
            Err(TransformError::InvalidHeaderName(_))
        ));
        assert!(matches!(
            config_getter(&extra(json!({"response": [{"type": "status.set", "status": 42}]}))),
            Err(TransformError::InvalidStatus(42))
        ));
        assert!(matches!(
            config_getter(&extra(json!({"request": [{"type": "path.set", "path": "relative"}]}))),
            Err(TransformError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_modify_request() {
        let rule = config_getter(&extra(json!({
            "request": [
                {"type": "header.set", "name": "x-api-key", "value": "k"},
                {"type": "header.remove", "name": "cookie"},
                {"type": "query.set", "key": "page", "value": "1"},
                {"type": "query.remove", "key": "debug"},
                {"type": "path.set", "path": "/v2/items"},
                {"type": "body.set", "body": "{}"}
            ]
        })))
        .unwrap()
        .unwrap();

        let mut request = Request::builder()
            .uri("http://api.local/v1/items?debug=true&page=9&sort=asc")
            .header("cookie", "s=1")
            .body(Bytes::from_static(b"old"))
            .unwrap();
        rule.modify_request(&mut request);

        assert_eq!(request.headers()["x-api-key"], "k");
        assert!(request.headers().get("cookie").is_none());
        assert_eq!(request.uri().to_string(), "http://api.local/v2/items?sort=asc&page=1");
        assert_eq!(request.body().as_ref(), b"{}");
    }

    #[test]
    fn test_modify_response() {
        let rule = config_getter(&extra(json!({
            "response": [
                {"type": "status.set", "status": 200},
                {"type": "header.set", "name": "x-served-by", "value": "gateway"},
                {"type": "header.remove", "name": "server"}
            ]
        })))
        .unwrap()
        .unwrap();

        let mut response = Response::builder()
            .status(201)
            .header("server", "nginx")
            .body(Bytes::new())
            .unwrap();
        rule.modify_response(&mut response);

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-served-by"], "gateway");
        assert!(response.headers().get("server").is_none());
    }
}
