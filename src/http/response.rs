//! Response handling and transformation.
//!
//! # Responsibilities
//! - Merge backend results into one client response
//! - Map backend errors to appropriate HTTP status codes
//!
//! # Design Decisions
//! - A lone `no-op` backend is forwarded verbatim (status, headers, body)
//! - Otherwise entities are merged in backend order; later keys win
//! - `x-gateway-completed` tells whether every backend answered completely
//! - Partial results are still a 200; only a total failure is an error
//! - Hop-by-hop headers stripped automatically

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{json, Map, Value};

use crate::proxy::{self, ProxyError};

pub const X_GATEWAY_COMPLETED: &str = "x-gateway-completed";

/// Outcome of one backend of an endpoint.
pub struct BackendResult<'a> {
    pub name: &'a str,
    pub is_noop: bool,
    pub result: Result<proxy::Response, ProxyError>,
}

pub fn error_response(error: &ProxyError) -> Response {
    let status = error.status_code();
    let body = json!({ "error": error.to_string(), "kind": error.kind() });
    (status, axum::Json(body)).into_response()
}

fn strip_hop_headers(headers: &mut HeaderMap) {
    for name in [
        header::CONNECTION,
        header::TRANSFER_ENCODING,
        header::CONTENT_LENGTH,
        header::UPGRADE,
    ] {
        headers.remove(name);
    }
}

fn passthrough(response: proxy::Response) -> Response {
    let status = StatusCode::from_u16(response.metadata.status_code).unwrap_or(StatusCode::OK);
    let mut headers = response.metadata.headers;
    strip_hop_headers(&mut headers);

    let mut out = Response::new(Body::from(response.body.unwrap_or_default()));
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    out
}

pub fn merge(mut results: Vec<BackendResult<'_>>) -> Response {
    if results.len() == 1 && results[0].is_noop {
        return match results.remove(0).result {
            Ok(response) => passthrough(response),
            Err(e) => error_response(&e),
        };
    }

    let mut data = Map::new();
    let mut completed = true;
    let mut first_error = None;
    let mut successes = 0;

    for backend in results {
        match backend.result {
            Ok(response) => {
                successes += 1;
                completed &= response.is_complete;
                data.extend(response.data);
            }
            Err(e) => {
                tracing::warn!(backend = %backend.name, error = %e, "Backend failed");
                completed = false;
                first_error.get_or_insert(e);
            }
        }
    }

    if successes == 0 {
        if let Some(e) = first_error {
            return error_response(&e);
        }
    }

    let mut response = axum::Json(Value::Object(data)).into_response();
    response.headers_mut().insert(
        X_GATEWAY_COMPLETED,
        HeaderValue::from_static(if completed { "true" } else { "false" }),
    );
    response
}
