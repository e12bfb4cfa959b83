//! The innermost backend handler: one outbound HTTP call per request.

use axum::body::Bytes;
use axum::http::{self, header, HeaderName, Method};
use futures_util::future::BoxFuture;
use url::Url;

use crate::client::ExecutorRef;
use crate::config::BackendConfig;
use crate::proxy::balancer::HostSelector;
use crate::proxy::parser::ResponseParser;
use crate::proxy::status::HttpStatusHandler;
use crate::proxy::{Context, Proxy, ProxyError, Request, Response};

/// Headers that describe the inbound hop and must not be forwarded.
const HOP_HEADERS: [HeaderName; 5] = [
    header::HOST,
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Replace `{param}` placeholders with request params. Unknown
/// placeholders are left untouched.
pub fn render_url_pattern(
    pattern: &str,
    params: &std::collections::HashMap<String, String>,
) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match params.get(key) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

pub struct HttpProxy {
    backend: String,
    url_pattern: String,
    method: Option<Method>,
    hosts: HostSelector,
    executor: ExecutorRef,
    status_handler: HttpStatusHandler,
    parser: ResponseParser,
}

impl HttpProxy {
    pub fn new(
        remote: &BackendConfig,
        executor: ExecutorRef,
        status_handler: HttpStatusHandler,
        parser: ResponseParser,
    ) -> Self {
        Self {
            backend: remote.name.clone(),
            url_pattern: remote.url_pattern.clone(),
            method: Method::from_bytes(remote.method.as_bytes()).ok(),
            hosts: HostSelector::new(&remote.hosts),
            executor,
            status_handler,
            parser,
        }
    }

    fn build_request(&self, request: Request) -> Result<http::Request<Bytes>, ProxyError> {
        let host = self
            .hosts
            .next_host()
            .ok_or_else(|| {
                ProxyError::InvalidRequest(format!("backend {} has no hosts", self.backend))
            })?;

        let path = render_url_pattern(&self.url_pattern, &request.params);
        let mut url = Url::parse(&format!("{host}{path}"))
            .map_err(|e| ProxyError::InvalidRequest(format!("{host}{path}: {e}")))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }

        let method = self.method.clone().unwrap_or(request.method);
        let mut outbound = http::Request::builder()
            .method(method)
            .uri(url.as_str())
            .body(request.body)
            .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;

        let mut headers = request.headers;
        for name in &HOP_HEADERS {
            headers.remove(name);
        }
        outbound.headers_mut().extend(headers);
        Ok(outbound)
    }
}

impl Proxy for HttpProxy {
    fn call<'a>(
        &'a self,
        ctx: &'a Context,
        request: Request,
    ) -> BoxFuture<'a, Result<Response, ProxyError>> {
        Box::pin(async move {
            let outbound = self.build_request(request)?;
            let response = ctx.run(self.executor.execute(ctx, outbound)).await?;
            let response = (self.status_handler)(response)?;
            self.parser.parse(response)
        })
    }
}
