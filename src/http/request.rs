//! Request handling and transformation.
//!
//! # Responsibilities
//! - Read the request id set by the request-id middleware
//! - Turn an inbound request into the backend-facing [`proxy::Request`]
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - The inbound body is buffered once and shared by every backend

use std::collections::HashMap;

use axum::body::Bytes;
use axum::http::{request::Parts, HeaderMap};

use crate::proxy;

pub const X_REQUEST_ID: &str = "x-request-id";

pub fn request_id(headers: &HeaderMap) -> Option<&str> {
    headers.get(X_REQUEST_ID).and_then(|v| v.to_str().ok())
}

pub fn backend_request(
    parts: &Parts,
    body: Bytes,
    params: HashMap<String, String>,
) -> proxy::Request {
    let query = parts
        .uri
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    proxy::Request {
        method: parts.method.clone(),
        path: parts.uri.path().to_string(),
        query,
        params,
        headers: parts.headers.clone(),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, Request};

    #[test]
    fn test_backend_request() {
        let (parts, _) = Request::builder()
            .method(Method::PUT)
            .uri("/users/7?tag=a&tag=b&q=hello%20world")
            .header(X_REQUEST_ID, "abc")
            .body(())
            .unwrap()
            .into_parts();

        let params: HashMap<String, String> = [("id".to_string(), "7".to_string())].into();
        let request = backend_request(&parts, Bytes::from_static(b"{}"), params);

        assert_eq!(request.method, Method::PUT);
        assert_eq!(request.path, "/users/7");
        assert_eq!(
            request.query,
            vec![
                ("tag".to_string(), "a".to_string()),
                ("tag".to_string(), "b".to_string()),
                ("q".to_string(), "hello world".to_string()),
            ]
        );
        assert_eq!(request.params["id"], "7");
        assert_eq!(request_id(&request.headers), Some("abc"));
    }
}
