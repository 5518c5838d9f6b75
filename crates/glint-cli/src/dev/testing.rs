//! In-memory stand-ins for the remote theme API and the storefront.

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::dev::remote::{classify, RemoteApi, RemoteAsset, RemoteTheme};
use crate::dev::sync::checksum;
use crate::dev::theme::Theme;
use crate::dev::upstream::{Upstream, UpstreamResponse};
use crate::error::RemoteError;

pub const STORE: &str = "shop.myshopify.com";

pub fn theme_for(root: &Path) -> Theme {
    Theme {
        id: 1,
        name: "Development (test)".to_string(),
        role: "development".to_string(),
        store: STORE.to_string(),
        root: root.to_path_buf(),
    }
}

pub fn write_theme_file(root: &Path, key: &str, content: &str) {
    let path = root.join(key);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

type ErrorFactory = Box<dyn Fn() -> RemoteError + Send + Sync>;

#[derive(Clone)]
struct StoredAsset {
    content: Vec<u8>,
    updated_at: DateTime<Utc>,
}

/// Remote theme store kept in memory.
#[derive(Default)]
pub struct FakeRemote {
    themes: Mutex<Vec<RemoteTheme>>,
    assets: Mutex<BTreeMap<String, StoredAsset>>,
    clock: Mutex<Option<DateTime<Utc>>>,
    denied: Mutex<Option<u16>>,
    put_failures: Mutex<(usize, Option<ErrorFactory>)>,
    put_delay: Mutex<Duration>,
    puts: AtomicUsize,
    active_puts: AtomicUsize,
    max_active_puts: AtomicUsize,
    active_by_key: Mutex<HashMap<String, usize>>,
    max_active_per_key: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_theme(&self, theme: RemoteTheme) {
        self.themes.lock().push(theme);
    }

    pub fn themes(&self) -> Vec<RemoteTheme> {
        self.themes.lock().clone()
    }

    /// Answer every call with the error for `status` (401 or 403).
    pub fn deny_access(&self, status: u16) {
        *self.denied.lock() = Some(status);
    }

    pub fn fail_next_puts(
        &self,
        count: usize,
        error: impl Fn() -> RemoteError + Send + Sync + 'static,
    ) {
        *self.put_failures.lock() = (count, Some(Box::new(error)));
    }

    pub fn set_put_delay(&self, delay: Duration) {
        *self.put_delay.lock() = delay;
    }

    /// Store `content` as if written through the online editor.
    pub fn insert(&self, key: &str, content: &[u8]) -> DateTime<Utc> {
        let updated_at = self.tick();
        self.insert_at(key, content, updated_at);
        updated_at
    }

    pub fn insert_at(&self, key: &str, content: &[u8], updated_at: DateTime<Utc>) {
        self.assets.lock().insert(
            key.to_string(),
            StoredAsset {
                content: content.to_vec(),
                updated_at,
            },
        );
    }

    pub fn content(&self, key: &str) -> Option<Vec<u8>> {
        self.assets.lock().get(key).map(|a| a.content.clone())
    }

    pub fn listing(&self) -> Vec<RemoteAsset> {
        self.assets
            .lock()
            .iter()
            .map(|(key, asset)| to_listing(key, asset))
            .collect()
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_puts(&self) -> usize {
        self.max_active_puts.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_puts_per_key(&self) -> usize {
        self.max_active_per_key.load(Ordering::SeqCst)
    }

    /// Strictly increasing timestamps, never behind the wall clock.
    fn tick(&self) -> DateTime<Utc> {
        let mut clock = self.clock.lock();
        let now = Utc::now();
        let next = match *clock {
            Some(last) if last >= now => last + ChronoDuration::milliseconds(1),
            _ => now,
        };
        *clock = Some(next);
        next
    }

    fn check_access(&self) -> Result<(), RemoteError> {
        match *self.denied.lock() {
            Some(status) => Err(classify(
                StatusCode::from_u16(status).unwrap_or(StatusCode::FORBIDDEN),
                "theme",
                "",
            )),
            None => Ok(()),
        }
    }

    fn begin_put(&self, key: &str) {
        let active = self.active_puts.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_puts.fetch_max(active, Ordering::SeqCst);

        let mut by_key = self.active_by_key.lock();
        let count = by_key.entry(key.to_string()).or_default();
        *count += 1;
        self.max_active_per_key.fetch_max(*count, Ordering::SeqCst);
    }

    fn end_put(&self, key: &str) {
        self.active_puts.fetch_sub(1, Ordering::SeqCst);
        if let Some(count) = self.active_by_key.lock().get_mut(key) {
            *count -= 1;
        }
    }
}

fn to_listing(key: &str, asset: &StoredAsset) -> RemoteAsset {
    RemoteAsset {
        key: key.to_string(),
        checksum: Some(checksum(&asset.content)),
        updated_at: asset.updated_at,
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn list_themes(&self) -> Result<Vec<RemoteTheme>, RemoteError> {
        self.check_access()?;
        Ok(self.themes())
    }

    async fn create_theme(&self, name: &str, role: &str) -> Result<RemoteTheme, RemoteError> {
        self.check_access()?;
        let mut themes = self.themes.lock();
        let theme = RemoteTheme {
            id: 1000 + themes.len() as u64,
            name: name.to_string(),
            role: role.to_string(),
        };
        themes.push(theme.clone());
        Ok(theme)
    }

    async fn list_assets(&self, _theme_id: u64) -> Result<Vec<RemoteAsset>, RemoteError> {
        self.check_access()?;
        Ok(self.listing())
    }

    async fn get_asset(&self, _theme_id: u64, key: &str) -> Result<Vec<u8>, RemoteError> {
        self.check_access()?;
        self.content(key).ok_or_else(|| RemoteError::NotFound {
            what: key.to_string(),
        })
    }

    async fn put_asset(
        &self,
        _theme_id: u64,
        key: &str,
        content: &[u8],
    ) -> Result<RemoteAsset, RemoteError> {
        self.check_access()?;
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.begin_put(key);

        let delay = *self.put_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failure = {
            let mut failures = self.put_failures.lock();
            if failures.0 > 0 {
                failures.0 -= 1;
                failures.1.as_ref().map(|make| make())
            } else {
                None
            }
        };

        let result = match failure {
            Some(err) => Err(err),
            None => {
                let updated_at = self.tick();
                let asset = StoredAsset {
                    content: content.to_vec(),
                    updated_at,
                };
                let listing = to_listing(key, &asset);
                self.assets.lock().insert(key.to_string(), asset);
                Ok(listing)
            }
        };

        self.end_put(key);
        result
    }

    async fn delete_asset(&self, _theme_id: u64, key: &str) -> Result<(), RemoteError> {
        self.check_access()?;
        self.assets
            .lock()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound {
                what: key.to_string(),
            })
    }
}

/// Storefront stand-in answering by URL prefix and recording requests.
#[derive(Default)]
pub struct FakeUpstream {
    routes: Mutex<Vec<(String, UpstreamResponse)>>,
    requests: Mutex<Vec<(Method, String, HeaderMap)>>,
    unreachable: Mutex<bool>,
}

impl FakeUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, url_prefix: &str, status: StatusCode, content_type: &str, body: &str) {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(content_type) {
            headers.insert(axum::http::header::CONTENT_TYPE, value);
        }
        self.route_with_headers(url_prefix, status, headers, body);
    }

    pub fn route_with_headers(
        &self,
        url_prefix: &str,
        status: StatusCode,
        headers: HeaderMap,
        body: &str,
    ) {
        self.routes.lock().push((
            url_prefix.to_string(),
            UpstreamResponse {
                status,
                headers,
                body: Bytes::from(body.to_string()),
            },
        ));
    }

    pub fn set_unreachable(&self) {
        *self.unreachable.lock() = true;
    }

    pub fn requests(&self) -> Vec<(Method, String, HeaderMap)> {
        self.requests.lock().clone()
    }

    pub fn request_urls(&self) -> Vec<String> {
        self.requests.lock().iter().map(|(_, url, _)| url.clone()).collect()
    }
}

#[async_trait]
impl Upstream for FakeUpstream {
    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        _body: Bytes,
    ) -> Result<UpstreamResponse, RemoteError> {
        self.requests
            .lock()
            .push((method, url.to_string(), headers));

        if *self.unreachable.lock() {
            return Err(RemoteError::Transport("connection refused".to_string()));
        }

        let routes = self.routes.lock();
        let found = routes
            .iter()
            .filter(|(prefix, _)| url.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, response)| response.clone());

        Ok(found.unwrap_or(UpstreamResponse {
            status: StatusCode::NOT_FOUND,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"not found"),
        }))
    }
}
