//! OAuth2 client-credentials executor.
//!
//! # Responsibilities
//! - Obtain an access token from the configured token endpoint
//! - Reuse the token until shortly before it expires
//! - Attach `Authorization: Bearer <token>` to every backend call
//!
//! # Design Decisions
//! - Credentials are sent in the form body (`client_id`/`client_secret`)
//! - A single in-flight refresh; concurrent callers wait on the same lock
//! - Token endpoint failures surface as `ProxyError::Auth`

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{header, HeaderValue, Method, Request, Response};
use futures_util::future::BoxFuture;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::client::{ExecutorRef, HttpRequestExecutor};
use crate::config::BackendConfig;
use crate::proxy::{Context, ProxyError};

pub const NAMESPACE: &str = "auth/client-credentials";

/// Refresh this long before the advertised expiry.
const EXPIRY_SKEW: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize)]
pub struct ClientCredentialsConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    /// Comma separated scopes.
    #[serde(default)]
    pub scopes: String,
    #[serde(default)]
    pub endpoint_params: BTreeMap<String, String>,
    #[serde(default)]
    pub is_disabled: bool,
}

/// Executor builder for credentialed backends.
///
/// A malformed or disabled configuration is logged and the bare transport
/// is returned, so the backend keeps working without credentials.
pub fn new_http_client(remote: &BackendConfig, transport: ExecutorRef) -> ExecutorRef {
    let Some(raw) = remote.extra_config.get(NAMESPACE) else {
        return transport;
    };
    match serde_json::from_value::<ClientCredentialsConfig>(raw.clone()) {
        Ok(config) if config.is_disabled => transport,
        Ok(config) => Arc::new(ClientCredentialsExecutor::new(config, transport)),
        Err(e) => {
            tracing::warn!(
                backend = %remote.name,
                error = %e,
                "Invalid client credentials config, calling backend without credentials"
            );
            transport
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    refresh_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.refresh_at.map_or(true, |at| Instant::now() < at)
    }
}

pub struct ClientCredentialsExecutor {
    config: ClientCredentialsConfig,
    inner: ExecutorRef,
    token: Mutex<Option<CachedToken>>,
}

impl ClientCredentialsExecutor {
    pub fn new(config: ClientCredentialsConfig, inner: ExecutorRef) -> Self {
        Self {
            config,
            inner,
            token: Mutex::new(None),
        }
    }

    fn token_request(&self) -> Result<Request<Bytes>, ProxyError> {
        let mut form = url::form_urlencoded::Serializer::new(String::new());
        form.append_pair("grant_type", "client_credentials")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("client_secret", &self.config.client_secret);

        let scopes: Vec<&str> = self
            .config
            .scopes
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if !scopes.is_empty() {
            form.append_pair("scope", &scopes.join(" "));
        }
        for (key, value) in &self.config.endpoint_params {
            form.append_pair(key, value);
        }

        Request::builder()
            .method(Method::POST)
            .uri(&self.config.token_url)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::ACCEPT, "application/json")
            .body(Bytes::from(form.finish()))
            .map_err(|e| ProxyError::Auth(format!("building token request: {e}")))
    }

    async fn fetch_token(&self, ctx: &Context) -> Result<CachedToken, ProxyError> {
        let response = self.inner.execute(ctx, self.token_request()?).await?;
        if !response.status().is_success() {
            return Err(ProxyError::Auth(format!(
                "token endpoint answered {}",
                response.status()
            )));
        }

        let token: TokenResponse = serde_json::from_slice(response.body())
            .map_err(|e| ProxyError::Auth(format!("malformed token response: {e}")))?;

        tracing::debug!(
            token_url = %self.config.token_url,
            expires_in = ?token.expires_in,
            "Fetched client credentials token"
        );

        Ok(CachedToken {
            access_token: token.access_token,
            refresh_at: token
                .expires_in
                .map(|secs| Instant::now() + Duration::from_secs(secs).saturating_sub(EXPIRY_SKEW)),
        })
    }

    async fn access_token(&self, ctx: &Context) -> Result<String, ProxyError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.access_token.clone());
        }
        let token = self.fetch_token(ctx).await?;
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }
}

impl HttpRequestExecutor for ClientCredentialsExecutor {
    fn execute<'a>(
        &'a self,
        ctx: &'a Context,
        mut request: Request<Bytes>,
    ) -> BoxFuture<'a, Result<Response<Bytes>, ProxyError>> {
        Box::pin(async move {
            let token = ctx.run(self.access_token(ctx)).await?;
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ProxyError::Auth("token is not a valid header value".into()))?;
            request.headers_mut().insert(header::AUTHORIZATION, value);
            self.inner.execute(ctx, request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::executor_fn;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config() -> ClientCredentialsConfig {
        ClientCredentialsConfig {
            client_id: "id".into(),
            client_secret: "secret".into(),
            token_url: "http://auth.local/token".into(),
            scopes: "read, write".into(),
            endpoint_params: BTreeMap::new(),
            is_disabled: false,
        }
    }

    /// Token endpoint plus an upstream echoing the Authorization header.
    fn fake_upstream(token_calls: Arc<AtomicUsize>) -> ExecutorRef {
        executor_fn(move |_ctx, req| {
            let is_token = req.uri().path() == "/token";
            if is_token {
                token_calls.fetch_add(1, Ordering::SeqCst);
            }
            async move {
                if is_token {
                    let form = String::from_utf8(req.body().to_vec()).unwrap();
                    assert!(form.contains("grant_type=client_credentials"));
                    assert!(form.contains("scope=read+write"));
                    return Ok::<_, ProxyError>(Response::new(Bytes::from_static(
                        br#"{"access_token":"t0k","token_type":"bearer","expires_in":3600}"#,
                    )));
                }
                let auth = req
                    .headers()
                    .get(header::AUTHORIZATION)
                    .map(|v| v.to_str().unwrap().to_string())
                    .unwrap_or_default();
                Ok::<_, ProxyError>(Response::new(Bytes::from(auth)))
            }
        })
    }

    fn call() -> Request<Bytes> {
        Request::builder()
            .uri("http://api.local/things")
            .body(Bytes::new())
            .unwrap()
    }

    #[tokio::test]
    async fn test_token_attached_and_reused() {
        let token_calls = Arc::new(AtomicUsize::new(0));
        let executor = ClientCredentialsExecutor::new(config(), fake_upstream(token_calls.clone()));
        let ctx = Context::new();

        for _ in 0..3 {
            let response = executor.execute(&ctx, call()).await.unwrap();
            assert_eq!(response.body().as_ref(), b"Bearer t0k");
        }
        assert_eq!(token_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_token_endpoint_failure() {
        let transport = executor_fn(|_ctx, _req| async {
            let mut response = Response::new(Bytes::from_static(b"nope"));
            *response.status_mut() = axum::http::StatusCode::UNAUTHORIZED;
            Ok::<_, ProxyError>(response)
        });
        let executor = ClientCredentialsExecutor::new(config(), transport);
        let result = executor.execute(&Context::new(), call()).await;
        assert!(matches!(result, Err(ProxyError::Auth(_))));
    }

    #[test]
    fn test_invalid_config_falls_back() {
        let transport = fake_upstream(Arc::new(AtomicUsize::new(0)));
        let mut remote = BackendConfig::default();
        remote
            .extra_config
            .insert(NAMESPACE.into(), serde_json::json!({"client_id": 1}));
        assert!(Arc::ptr_eq(&new_http_client(&remote, transport.clone()), &transport));
    }
}
