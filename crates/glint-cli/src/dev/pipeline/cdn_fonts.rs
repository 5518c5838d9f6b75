use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use parking_lot::Mutex;
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, LazyLock};

use super::{content_type_for, Handler, Next, ThemeRequest, ThemeResponse};
use crate::dev::upstream::Upstream;

pub const FONTS_ORIGIN: &str = "https://fonts.shopifycdn.com";
const FONTS_PATH: &str = "/fonts";
const DEFAULT_CACHED_FONTS: usize = 128;

static FONT_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:https?:)?//fonts\.shopifycdn\.com").expect("font origin pattern")
});

#[derive(Clone)]
struct CachedFont {
    content_type: HeaderValue,
    body: Bytes,
}

/// Fonts by CDN path and query, oldest evicted first.
struct FontCache {
    fonts: HashMap<String, CachedFont>,
    order: VecDeque<String>,
    capacity: usize,
}

impl FontCache {
    fn get(&self, path: &str) -> Option<CachedFont> {
        self.fonts.get(path).cloned()
    }

    fn insert(&mut self, path: String, font: CachedFont) {
        if self.fonts.insert(path.clone(), font).is_some() {
            return;
        }
        self.order.push_back(path);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.fonts.remove(&oldest);
            }
        }
    }
}

/// Serves `/fonts/*` from memory, fetching from the font CDN on first use,
/// and points font URLs in delegated HTML and CSS at it.
pub struct CdnFontHandler {
    upstream: Arc<dyn Upstream>,
    cache: Mutex<FontCache>,
}

impl CdnFontHandler {
    pub fn new(upstream: Arc<dyn Upstream>) -> Self {
        Self::with_capacity(upstream, DEFAULT_CACHED_FONTS)
    }

    /// Keep at most `capacity` fonts in memory.
    pub fn with_capacity(upstream: Arc<dyn Upstream>, capacity: usize) -> Self {
        Self {
            upstream,
            cache: Mutex::new(FontCache {
                fonts: HashMap::new(),
                order: VecDeque::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    async fn serve(&self, request: &ThemeRequest) -> ThemeResponse {
        let path_and_query = request
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| request.path());
        let remote_path = path_and_query
            .strip_prefix(FONTS_PATH)
            .unwrap_or(path_and_query);

        let cached = self.cache.lock().get(remote_path);
        let font = match cached {
            Some(font) => font,
            None => {
                let url = format!("{FONTS_ORIGIN}{remote_path}");
                let response = match self
                    .upstream
                    .send(Method::GET, &url, HeaderMap::new(), Bytes::new())
                    .await
                {
                    Ok(response) => response,
                    Err(err) => {
                        tracing::warn!(%url, "font fetch failed: {}", err);
                        return ThemeResponse::bad_gateway(&err.to_string());
                    }
                };

                if !response.status.is_success() {
                    let mut relayed = ThemeResponse::new(response.status, "", response.body);
                    relayed.headers = response.headers;
                    return relayed;
                }

                let content_type = response
                    .headers
                    .get(header::CONTENT_TYPE)
                    .cloned()
                    .unwrap_or_else(|| HeaderValue::from_static(content_type_for(request.path())));
                let font = CachedFont {
                    content_type,
                    body: response.body,
                };
                self.cache
                    .lock()
                    .insert(remote_path.to_string(), font.clone());
                font
            }
        };

        let mut response = ThemeResponse::new(StatusCode::OK, "", font.body);
        response.headers.insert(header::CONTENT_TYPE, font.content_type);
        response.headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("public, max-age=31536000"),
        );
        response
    }
}

#[async_trait]
impl Handler for CdnFontHandler {
    fn name(&self) -> &'static str {
        "cdn-fonts"
    }

    async fn handle(&self, request: ThemeRequest, next: Next<'_>) -> ThemeResponse {
        if request.method == Method::GET && request.path().starts_with("/fonts/") {
            return self.serve(&request).await;
        }

        next.run(request)
            .await
            .rewrite_text(&["text/html", "text/css"], |text| {
                match FONT_URL.replace_all(text, FONTS_PATH) {
                    std::borrow::Cow::Borrowed(_) => None,
                    std::borrow::Cow::Owned(rewritten) => Some(rewritten),
                }
            })
    }
}
