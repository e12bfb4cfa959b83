//! Upstream status classification.
//!
//! Decides whether an upstream answer is an application-level outcome that
//! gets parsed and forwarded, or a transport failure. The allow-list is a
//! compatibility surface: changing it changes what every backend reports.

use axum::body::Bytes;
use axum::http::Response;

use crate::proxy::ProxyError;

/// Screens an upstream response before it is parsed.
pub type HttpStatusHandler = fn(Response<Bytes>) -> Result<Response<Bytes>, ProxyError>;

/// Status codes treated as valid outcomes, in ascending order.
pub const VALID_STATUS_CODES: [u16; 22] = [
    200, 201, 202, 204, 208, //
    302, 304, 307, 308, //
    400, 401, 403, 404, 405, 409, 410, 417, 422, //
    501, 503, 504, 507,
];

/// Returns true if `status` is on the allow-list.
pub fn is_valid_status(status: u16) -> bool {
    matches!(
        status,
        200 | 201 | 202 | 204 | 208
            | 302 | 304 | 307 | 308
            | 400 | 401 | 403 | 404 | 405 | 409 | 410 | 417 | 422
            | 501 | 503 | 504 | 507
    )
}

/// Forwards allow-listed responses; anything else becomes
/// [`ProxyError::InvalidStatusCode`] and the body is dropped.
pub fn restless_status_handler(response: Response<Bytes>) -> Result<Response<Bytes>, ProxyError> {
    let status = response.status().as_u16();
    if is_valid_status(status) {
        Ok(response)
    } else {
        Err(ProxyError::InvalidStatusCode { status })
    }
}

/// Forwards every response unchanged.
pub fn noop_status_handler(response: Response<Bytes>) -> Result<Response<Bytes>, ProxyError> {
    Ok(response)
}
