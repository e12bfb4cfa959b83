//! Per-call context threaded through every layer.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::proxy::ProxyError;

/// Carries cancellation, deadline and correlation for one call.
///
/// Cloning is cheap. A child context is cancelled with its parent but can
/// be cancelled on its own, and never extends the parent's deadline.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    request_id: Option<String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a context cancelled together with `self`.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
            request_id: self.request_id.clone(),
        }
    }

    /// Set a deadline; the earlier of the existing and new deadline wins.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the context is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Drive `fut` unless the context is cancelled or its deadline passes
    /// first. The future is dropped in either case.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, ProxyError>
    where
        F: Future<Output = Result<T, ProxyError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(ProxyError::Cancelled);
        }
        if matches!(self.deadline, Some(d) if d <= Instant::now()) {
            return Err(ProxyError::DeadlineExceeded);
        }

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ProxyError::Cancelled),
            _ = deadline => Err(ProxyError::DeadlineExceeded),
            result = fut => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes() {
        let ctx = Context::new();
        let value = ctx.run(async { Ok::<_, ProxyError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_deadline_interrupts() {
        let ctx = Context::new().with_timeout(Duration::from_millis(20));
        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, ProxyError>(())
            })
            .await;
        assert!(matches!(result, Err(ProxyError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_parent_cancellation_reaches_child() {
        let parent = Context::new();
        let child = parent.child().with_request_id("abc");
        parent.cancel();
        assert!(child.is_cancelled());
        assert_eq!(child.request_id(), Some("abc"));

        let result = child.run(async { Ok::<_, ProxyError>(()) }).await;
        assert!(matches!(result, Err(ProxyError::Cancelled)));
    }

    #[test]
    fn test_deadline_never_extends() {
        let early = Instant::now() + Duration::from_secs(1);
        let ctx = Context::new()
            .with_deadline(early)
            .with_timeout(Duration::from_secs(60));
        assert_eq!(ctx.deadline(), Some(early));
    }
}
