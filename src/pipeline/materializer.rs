//! Response materialization: the innermost backend handler.

use std::sync::Arc;

use crate::client::ExecutorRef;
use crate::config::BackendConfig;
use crate::proxy::encoding::{Decoder, NOOP};
use crate::proxy::formatter::EntityFormatter;
use crate::proxy::http::HttpProxy;
use crate::proxy::parser::ResponseParser;
use crate::proxy::status::{noop_status_handler, restless_status_handler};
use crate::proxy::ProxyRef;

/// Build the HTTP handler of a backend around its executor.
///
/// `no-op` backends forward the upstream answer untouched, whatever its
/// status. Every other encoding screens the status, decodes the body and
/// formats the entity.
pub fn materialize(remote: &BackendConfig, executor: ExecutorRef) -> ProxyRef {
    if remote.encoding == NOOP {
        return Arc::new(HttpProxy::new(
            remote,
            executor,
            noop_status_handler,
            ResponseParser::noop(),
        ));
    }

    let decoder = Decoder::from_encoding(&remote.encoding).unwrap_or_else(|| {
        tracing::warn!(
            backend = %remote.name,
            encoding = %remote.encoding,
            "Unknown encoding, decoding as json"
        );
        Decoder::Json
    });
    let parser = ResponseParser::new(decoder, EntityFormatter::new(remote), remote.is_collection);
    Arc::new(HttpProxy::new(remote, executor, restless_status_handler, parser))
}
