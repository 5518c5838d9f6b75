//! Request pipeline.
//!
//! Handlers run front to back in a fixed order. Each one either answers the
//! request or hands it to the rest of the chain through [`Next`], and may
//! rewrite the response on the way back:
//!
//! 1. [`HotReloadHandler`]: reload stream and client script, script injection
//! 2. [`LocalAssetHandler`]: `/assets/*` from the working copy
//! 3. [`CdnFontHandler`]: `/fonts/*` from a local cache
//! 4. [`ProxyHandler`]: everything else, from the storefront
//!
//! The types here are transport-independent; `dev::server` adapts them to axum.

mod cdn_fonts;
mod hot_reload;
mod local_assets;
mod proxy;

pub use cdn_fonts::CdnFontHandler;
pub use hot_reload::{HotReloadHandler, CLIENT_SCRIPT, RELOAD_PATH, SCRIPT_PATH};
pub use local_assets::LocalAssetHandler;
pub use proxy::ProxyHandler;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use std::sync::Arc;

use crate::dev::broadcast::BroadcastStream;

#[derive(Debug, Clone)]
pub struct ThemeRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ThemeRequest {
    pub fn get(uri: &str) -> Self {
        Self {
            method: Method::GET,
            uri: uri.parse().unwrap_or_else(|_| Uri::from_static("/")),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.uri.query()?.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (k == name).then_some(v)
        })
    }
}

pub enum ResponseBody {
    Full(Bytes),
    /// Long-lived server-sent event stream
    Events(BroadcastStream),
}

pub struct ThemeResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl ThemeResponse {
    pub fn new(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(content_type) {
            headers.insert(header::CONTENT_TYPE, value);
        }
        Self {
            status,
            headers,
            body: ResponseBody::Full(body.into()),
        }
    }

    pub fn events(stream: BroadcastStream) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        Self {
            status: StatusCode::OK,
            headers,
            body: ResponseBody::Events(stream),
        }
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "text/plain; charset=utf-8", "Not found")
    }

    pub fn bad_gateway(detail: &str) -> Self {
        Self::new(
            StatusCode::BAD_GATEWAY,
            "text/plain; charset=utf-8",
            format!("Bad gateway: {detail}"),
        )
    }

    pub fn content_type(&self) -> &str {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }

    pub fn is_html(&self) -> bool {
        self.content_type().starts_with("text/html")
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        match &self.body {
            ResponseBody::Full(bytes) => Some(bytes),
            ResponseBody::Events(_) => None,
        }
    }

    /// Rewrite a UTF-8 body when the content type starts with one of
    /// `content_types`. Other responses pass through untouched.
    pub fn rewrite_text(
        mut self,
        content_types: &[&str],
        rewrite: impl FnOnce(&str) -> Option<String>,
    ) -> Self {
        if !content_types
            .iter()
            .any(|ct| self.content_type().starts_with(ct))
        {
            return self;
        }

        let ResponseBody::Full(bytes) = &self.body else {
            return self;
        };
        let Ok(text) = std::str::from_utf8(bytes) else {
            return self;
        };

        if let Some(rewritten) = rewrite(text) {
            self.headers.remove(header::CONTENT_LENGTH);
            self.headers.remove(header::ETAG);
            self.body = ResponseBody::Full(Bytes::from(rewritten));
        }
        self
    }
}

impl std::fmt::Debug for ThemeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThemeResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type())
            .finish()
    }
}

/// One stage of the pipeline.
#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Answer `request`, or call `next.run(request)` to delegate.
    async fn handle(&self, request: ThemeRequest, next: Next<'_>) -> ThemeResponse;
}

/// The handlers after the current one.
pub struct Next<'a> {
    rest: &'a [Arc<dyn Handler>],
}

impl<'a> Next<'a> {
    pub async fn run(self, request: ThemeRequest) -> ThemeResponse {
        match self.rest.split_first() {
            Some((handler, rest)) => handler.handle(request, Next { rest }).await,
            None => ThemeResponse::not_found(),
        }
    }
}

pub struct Pipeline {
    handlers: Vec<Arc<dyn Handler>>,
}

impl Pipeline {
    /// The four stages, always in this order.
    pub fn new(
        hot_reload: HotReloadHandler,
        local_assets: LocalAssetHandler,
        fonts: CdnFontHandler,
        proxy: ProxyHandler,
    ) -> Self {
        Self {
            handlers: vec![
                Arc::new(hot_reload),
                Arc::new(local_assets),
                Arc::new(fonts),
                Arc::new(proxy),
            ],
        }
    }

    /// Arbitrary handler list, for exercising stages in isolation.
    pub fn from_handlers(handlers: Vec<Arc<dyn Handler>>) -> Self {
        Self { handlers }
    }

    pub async fn handle(&self, request: ThemeRequest) -> ThemeResponse {
        Next {
            rest: &self.handlers,
        }
        .run(request)
        .await
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }
}

/// Content type by extension, ignoring a trailing `.liquid`.
pub fn content_type_for(path: &str) -> &'static str {
    let path = path.strip_suffix(".liquid").unwrap_or(path);
    let extension = std::path::Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match extension.as_str() {
        "js" | "mjs" => "application/javascript",
        "json" | "map" => "application/json",
        "html" => "text/html; charset=utf-8",
        "css" => "text/css",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
