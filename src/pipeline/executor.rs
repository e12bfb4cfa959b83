//! Request executor selection.

use std::sync::Arc;

use crate::client::{httpcache, oauth2, ExecutorRef};
use crate::config::BackendConfig;
use crate::observability::TracedExecutor;

/// Which executor builder a backend gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    /// OAuth2 client-credentials, selected by `auth/client-credentials`.
    ClientCredentials,
    /// Cached HTTP client; a plain transport unless `qos/http-cache` is set.
    Cached,
}

pub fn client_kind(remote: &BackendConfig) -> ClientKind {
    if remote.has_namespace(oauth2::NAMESPACE) {
        ClientKind::ClientCredentials
    } else {
        ClientKind::Cached
    }
}

/// Build the traced request executor of a backend on top of `transport`.
pub fn request_executor(remote: &BackendConfig, transport: &ExecutorRef) -> ExecutorRef {
    let executor = match client_kind(remote) {
        ClientKind::ClientCredentials => oauth2::new_http_client(remote, transport.clone()),
        ClientKind::Cached => httpcache::new_http_client(remote, transport.clone()),
    };
    Arc::new(TracedExecutor::new(remote.name.clone(), executor))
}
