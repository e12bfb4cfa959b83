//! Response body decoders.

use serde_json::{Map, Value};

use crate::proxy::ProxyError;

pub const JSON: &str = "json";
pub const SAFE_JSON: &str = "safejson";
pub const STRING: &str = "string";
pub const NOOP: &str = "no-op";

/// Key used when a non-object payload is wrapped into an entity.
pub const COLLECTION_KEY: &str = "collection";
pub const CONTENT_KEY: &str = "content";

/// Decoder selected by a backend's `encoding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoder {
    /// Strict JSON: an object, or an array when `is_collection` is set.
    Json,
    /// Any JSON value; non-objects are wrapped.
    SafeJson,
    /// Body as text under `content`.
    String,
    /// No decoding at all.
    NoOp,
}

impl Decoder {
    /// Look up a decoder by encoding name.
    pub fn from_encoding(encoding: &str) -> Option<Self> {
        match encoding {
            "" | JSON => Some(Decoder::Json),
            SAFE_JSON => Some(Decoder::SafeJson),
            STRING => Some(Decoder::String),
            NOOP => Some(Decoder::NoOp),
            _ => None,
        }
    }

    /// Decode a body into an entity map.
    ///
    /// An empty body decodes to an empty entity for every decoder, so
    /// answers like 204 never fail decoding.
    pub fn decode(
        &self,
        body: &[u8],
        is_collection: bool,
    ) -> Result<Map<String, Value>, ProxyError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Map::new());
        }

        match self {
            Decoder::Json => {
                let value: Value =
                    serde_json::from_slice(body).map_err(|e| ProxyError::Decode(e.to_string()))?;
                match (value, is_collection) {
                    (Value::Array(items), true) => Ok(wrap(COLLECTION_KEY, Value::Array(items))),
                    (Value::Object(map), false) => Ok(map),
                    (other, true) => Err(ProxyError::Decode(format!(
                        "expected a JSON array, got {}",
                        type_name(&other)
                    ))),
                    (other, false) => Err(ProxyError::Decode(format!(
                        "expected a JSON object, got {}",
                        type_name(&other)
                    ))),
                }
            }
            Decoder::SafeJson => {
                let value: Value =
                    serde_json::from_slice(body).map_err(|e| ProxyError::Decode(e.to_string()))?;
                Ok(match value {
                    Value::Object(map) => map,
                    Value::Array(items) => wrap(COLLECTION_KEY, Value::Array(items)),
                    other => wrap(CONTENT_KEY, other),
                })
            }
            Decoder::String => Ok(wrap(
                CONTENT_KEY,
                Value::String(String::from_utf8_lossy(body).into_owned()),
            )),
            Decoder::NoOp => Ok(Map::new()),
        }
    }
}

fn wrap(key: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    map
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
