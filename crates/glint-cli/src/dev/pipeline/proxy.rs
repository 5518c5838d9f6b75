use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;
use std::sync::Arc;

use super::{Handler, Next, ResponseBody, ThemeRequest, ThemeResponse};
use crate::dev::upstream::Upstream;

/// Connection-level headers that must not be forwarded in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Terminal stage: forwards to the storefront, rendering the theme under
/// development.
pub struct ProxyHandler {
    upstream: Arc<dyn Upstream>,
    store: String,
    theme_id: u64,
}

impl ProxyHandler {
    pub fn new(upstream: Arc<dyn Upstream>, store: impl Into<String>, theme_id: u64) -> Self {
        Self {
            upstream,
            store: store.into(),
            theme_id,
        }
    }

    fn target_url(&self, request: &ThemeRequest) -> Option<Url> {
        let path_and_query = request
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let mut url = Url::parse(&format!("https://{}{}", self.store, path_and_query)).ok()?;

        let theme_id = self.theme_id.to_string();
        url.query_pairs_mut()
            .append_pair("preview_theme_id", &theme_id)
            .append_pair("_fd", "0")
            .append_pair("pb", "0");
        Some(url)
    }

    fn outbound_headers(&self, headers: &HeaderMap) -> HeaderMap {
        let mut forwarded = strip_hop_by_hop(headers);
        forwarded.remove(header::HOST);
        forwarded.remove(header::CONTENT_LENGTH);
        // Bodies may be rewritten on the way back.
        forwarded.remove(header::ACCEPT_ENCODING);
        forwarded
    }

    /// Make redirects to the store stay on the dev server.
    fn rewrite_location(&self, headers: &mut HeaderMap) {
        let Some(location) = headers.get(header::LOCATION).and_then(|v| v.to_str().ok()) else {
            return;
        };

        let relative = ["https://", "http://", "//"].iter().find_map(|scheme| {
            location
                .strip_prefix(scheme)?
                .strip_prefix(self.store.as_str())
                .filter(|rest| rest.is_empty() || rest.starts_with(['/', '?']))
        });

        if let Some(rest) = relative {
            let rewritten = if rest.starts_with('/') {
                rest.to_string()
            } else {
                format!("/{rest}")
            };
            if let Ok(value) = HeaderValue::from_str(&rewritten) {
                headers.insert(header::LOCATION, value);
            }
        }
    }
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut stripped = headers.clone();

    // Headers named in `Connection` are hop-by-hop too.
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in HOP_BY_HOP {
        stripped.remove(*name);
    }
    for name in named {
        stripped.remove(name);
    }
    stripped
}

#[async_trait]
impl Handler for ProxyHandler {
    fn name(&self) -> &'static str {
        "proxy"
    }

    async fn handle(&self, request: ThemeRequest, _next: Next<'_>) -> ThemeResponse {
        let Some(url) = self.target_url(&request) else {
            return ThemeResponse::bad_gateway("invalid request path");
        };

        let headers = self.outbound_headers(&request.headers);
        let result = self
            .upstream
            .send(request.method.clone(), url.as_str(), headers, request.body)
            .await;

        match result {
            Ok(response) => {
                let mut headers = strip_hop_by_hop(&response.headers);
                headers.remove(header::CONTENT_LENGTH);
                self.rewrite_location(&mut headers);
                ThemeResponse {
                    status: response.status,
                    headers,
                    body: ResponseBody::Full(response.body),
                }
            }
            Err(err) => {
                tracing::warn!(url = %url, "storefront request failed: {}", err);
                ThemeResponse::bad_gateway(&err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::pipeline::Pipeline;
    use crate::dev::testing::{FakeUpstream, STORE};
    use axum::http::{Method, StatusCode};

    fn setup(upstream: &Arc<FakeUpstream>) -> Pipeline {
        Pipeline::from_handlers(vec![Arc::new(ProxyHandler::new(upstream.clone(), STORE, 42))])
    }

    #[tokio::test]
    async fn test_forwards_with_preview_context() {
        let upstream = Arc::new(FakeUpstream::new());
        upstream.route("https://shop.myshopify.com/products", StatusCode::OK, "text/html", "<p>shoe</p>");

        let mut request = ThemeRequest::get("/products/shoe?variant=1");
        request.headers.insert(header::HOST, HeaderValue::from_static("127.0.0.1:9292"));
        request.headers.insert(header::COOKIE, HeaderValue::from_static("cart=abc"));
        request.headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        request.headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-trace"));
        request.headers.insert("x-trace", HeaderValue::from_static("1"));

        let response = setup(&upstream).handle(request).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body_bytes().unwrap().as_ref(), b"<p>shoe</p>");

        let (method, url, headers) = upstream.requests().remove(0);
        assert_eq!(method, Method::GET);
        assert_eq!(
            url,
            "https://shop.myshopify.com/products/shoe?variant=1&preview_theme_id=42&_fd=0&pb=0"
        );
        assert_eq!(headers.get(header::COOKIE).unwrap(), "cart=abc");
        assert!(headers.get(header::HOST).is_none());
        assert!(headers.get(header::ACCEPT_ENCODING).is_none());
        assert!(headers.get("x-trace").is_none());
    }

    #[tokio::test]
    async fn test_rewrites_store_redirects() {
        let upstream = Arc::new(FakeUpstream::new());
        let mut headers = HeaderMap::new();
        headers.insert(
            header::LOCATION,
            HeaderValue::from_static("https://shop.myshopify.com/cart?step=1"),
        );
        upstream.route_with_headers("https://shop.myshopify.com/cart/add", StatusCode::FOUND, headers, "");

        let mut external = HeaderMap::new();
        external.insert(header::LOCATION, HeaderValue::from_static("https://accounts.example.com/login"));
        upstream.route_with_headers("https://shop.myshopify.com/account", StatusCode::FOUND, external, "");

        let pipeline = setup(&upstream);
        let mut request = ThemeRequest::get("/cart/add");
        request.method = Method::POST;
        let response = pipeline.handle(request).await;
        assert_eq!(response.status, StatusCode::FOUND);
        assert_eq!(response.headers.get(header::LOCATION).unwrap(), "/cart?step=1");

        let response = pipeline.handle(ThemeRequest::get("/account")).await;
        assert_eq!(
            response.headers.get(header::LOCATION).unwrap(),
            "https://accounts.example.com/login"
        );
    }

    #[tokio::test]
    async fn test_upstream_failure_is_bad_gateway() {
        let upstream = Arc::new(FakeUpstream::new());
        upstream.set_unreachable();

        let response = setup(&upstream).handle(ThemeRequest::get("/")).await;
        assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    }
}
