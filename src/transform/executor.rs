use axum::body::Bytes;
use axum::http::{Request, Response};
use futures_util::future::BoxFuture;

use crate::client::{ExecutorRef, HttpRequestExecutor};
use crate::proxy::{Context, ProxyError};
use crate::transform::TransformRule;

/// Applies a [`TransformRule`] around another executor.
pub struct TransformExecutor {
    rule: TransformRule,
    inner: ExecutorRef,
}

impl TransformExecutor {
    pub fn new(rule: TransformRule, inner: ExecutorRef) -> Self {
        Self { rule, inner }
    }
}

impl HttpRequestExecutor for TransformExecutor {
    fn execute<'a>(
        &'a self,
        ctx: &'a Context,
        mut request: Request<Bytes>,
    ) -> BoxFuture<'a, Result<Response<Bytes>, ProxyError>> {
        Box::pin(async move {
            self.rule.modify_request(&mut request);
            let mut response = self.inner.execute(ctx, request).await?;
            self.rule.modify_response(&mut response);
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::executor_fn;
    use crate::transform::{RequestModifier, ResponseModifier};
    use axum::http::{HeaderName, HeaderValue, StatusCode};

    #[tokio::test]
    async fn test_wraps_both_directions() {
        let inner = executor_fn(|_ctx, req: Request<Bytes>| async move {
            let echoed = req
                .headers()
                .get("x-tenant")
                .map(|v| v.as_bytes().to_vec())
                .unwrap_or_default();
            let mut response = Response::new(Bytes::from(echoed));
            *response.status_mut() = StatusCode::CREATED;
            Ok::<_, ProxyError>(response)
        });

        let rule = TransformRule {
            request: vec![RequestModifier::SetHeader(
                HeaderName::from_static("x-tenant"),
                HeaderValue::from_static("acme"),
            )],
            response: vec![ResponseModifier::SetStatus(StatusCode::OK)],
        };
        let executor = TransformExecutor::new(rule, inner);

        let request = Request::builder()
            .uri("http://api.local/")
            .body(Bytes::new())
            .unwrap();
        let response = executor.execute(&Context::new(), request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), b"acme");
    }
}
