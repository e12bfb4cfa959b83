//! Turns a screened upstream response into a [`Response`].

use axum::body::Bytes;
use axum::http;

use crate::proxy::encoding::Decoder;
use crate::proxy::formatter::EntityFormatter;
use crate::proxy::{Metadata, ProxyError, Response};

#[derive(Debug, Clone)]
pub enum ResponseParser {
    /// Forward the raw body and metadata without decoding.
    NoOp,
    /// Decode the body and shape it with the formatter.
    Decoding {
        decoder: Decoder,
        formatter: EntityFormatter,
        is_collection: bool,
    },
}

impl ResponseParser {
    pub fn new(decoder: Decoder, formatter: EntityFormatter, is_collection: bool) -> Self {
        ResponseParser::Decoding {
            decoder,
            formatter,
            is_collection,
        }
    }

    pub fn noop() -> Self {
        ResponseParser::NoOp
    }

    pub fn parse(&self, response: http::Response<Bytes>) -> Result<Response, ProxyError> {
        let (parts, body) = response.into_parts();
        let metadata = Metadata {
            status_code: parts.status.as_u16(),
            headers: parts.headers,
        };

        match self {
            ResponseParser::NoOp => Ok(Response {
                data: Default::default(),
                is_complete: true,
                metadata,
                body: Some(body),
            }),
            ResponseParser::Decoding {
                decoder,
                formatter,
                is_collection,
            } => {
                let data = decoder.decode(&body, *is_collection)?;
                Ok(formatter.format(Response {
                    data,
                    is_complete: true,
                    metadata,
                    body: None,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use serde_json::json;

    fn upstream(status: u16, body: &'static str) -> http::Response<Bytes> {
        http::Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(Bytes::from_static(body.as_bytes()))
            .unwrap()
    }

    #[test]
    fn test_noop_keeps_raw_body() {
        let parsed = ResponseParser::noop().parse(upstream(200, "ok")).unwrap();
        assert_eq!(parsed.body.as_deref(), Some(&b"ok"[..]));
        assert!(parsed.data.is_empty());
        assert_eq!(parsed.metadata.status_code, 200);
    }

    #[test]
    fn test_decoding_applies_formatter() {
        let remote = BackendConfig {
            allow: vec!["id".into()],
            ..Default::default()
        };
        let parser = ResponseParser::new(Decoder::Json, EntityFormatter::new(&remote), false);
        let parsed = parser.parse(upstream(201, r#"{"id":7,"x":1}"#)).unwrap();
        assert_eq!(serde_json::Value::Object(parsed.data), json!({"id": 7}));
        assert_eq!(parsed.metadata.status_code, 201);
        assert_eq!(
            parsed.metadata.headers.get("content-type").unwrap(),
            "application/json"
        );
        assert!(parsed.body.is_none());
    }

    #[test]
    fn test_decode_error_surfaces() {
        let parser = ResponseParser::new(Decoder::Json, EntityFormatter::default(), false);
        assert!(matches!(
            parser.parse(upstream(200, "<html>")),
            Err(ProxyError::Decode(_))
        ));
    }
}
