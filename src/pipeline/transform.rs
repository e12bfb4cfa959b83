//! Dynamic transform resolution.

use std::sync::Arc;

use crate::client::ExecutorRef;
use crate::config::BackendConfig;
use crate::transform::{self, TransformExecutor};

/// Wrap `executor` with the backend's transform rule, if it has a valid one.
///
/// Absent or empty rules return `executor` itself. Invalid rules are
/// logged and treated as absent.
pub fn resolve_transform(remote: &BackendConfig, executor: ExecutorRef) -> ExecutorRef {
    match transform::config_getter(&remote.extra_config) {
        Ok(None) => executor,
        Ok(Some(rule)) => Arc::new(TransformExecutor::new(rule, executor)),
        Err(error) => {
            tracing::error!(
                backend = %remote.name,
                %error,
                config = ?remote.extra_config.get(transform::NAMESPACE),
                "Invalid transform config, backend built without it"
            );
            executor
        }
    }
}
