//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use glint_cli::dev::filter::{ChangeFilter, IgnoreFilter};
use glint_cli::dev::sync::checksum;
use glint_cli::dev::{RemoteApi, RemoteAsset, RemoteTheme, Theme, Upstream, UpstreamResponse};
use glint_cli::RemoteError;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const STORE: &str = "shop.myshopify.com";

pub fn theme(root: &Path) -> Theme {
    Theme {
        id: 1,
        name: "Development (ci)".to_string(),
        role: "development".to_string(),
        store: STORE.to_string(),
        root: root.to_path_buf(),
    }
}

pub fn filter(root: &Path) -> Arc<dyn ChangeFilter> {
    Arc::new(IgnoreFilter::from_root(root, &[]).unwrap())
}

pub fn write(root: &Path, key: &str, content: &str) {
    let path = root.join(key);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// In-memory remote theme store that tracks write concurrency.
#[derive(Default)]
pub struct FakeRemote {
    themes: Mutex<Vec<RemoteTheme>>,
    assets: Mutex<BTreeMap<String, (Vec<u8>, DateTime<Utc>)>>,
    clock: Mutex<Option<DateTime<Utc>>>,
    put_delay: Mutex<Duration>,
    puts: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    active_by_key: Mutex<HashMap<String, usize>>,
    max_active_per_key: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_theme(id: u64, name: &str) -> Self {
        let remote = Self::new();
        remote.themes.lock().push(RemoteTheme {
            id,
            name: name.to_string(),
            role: "unpublished".to_string(),
        });
        remote
    }

    pub fn set_put_delay(&self, delay: Duration) {
        *self.put_delay.lock() = delay;
    }

    /// Store `content` as an online-editor edit.
    pub fn insert(&self, key: &str, content: &[u8]) -> DateTime<Utc> {
        let updated_at = self.tick();
        self.assets
            .lock()
            .insert(key.to_string(), (content.to_vec(), updated_at));
        updated_at
    }

    pub fn content(&self, key: &str) -> Option<Vec<u8>> {
        self.assets.lock().get(key).map(|(content, _)| content.clone())
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_puts(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_puts_per_key(&self) -> usize {
        self.max_active_per_key.load(Ordering::SeqCst)
    }

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
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn list_themes(&self) -> Result<Vec<RemoteTheme>, RemoteError> {
        Ok(self.themes.lock().clone())
    }

    async fn create_theme(&self, name: &str, role: &str) -> Result<RemoteTheme, RemoteError> {
        let mut themes = self.themes.lock();
        let theme = RemoteTheme {
            id: 500 + themes.len() as u64,
            name: name.to_string(),
            role: role.to_string(),
        };
        themes.push(theme.clone());
        Ok(theme)
    }

    async fn list_assets(&self, _theme_id: u64) -> Result<Vec<RemoteAsset>, RemoteError> {
        Ok(self
            .assets
            .lock()
            .iter()
            .map(|(key, (content, updated_at))| RemoteAsset {
                key: key.clone(),
                checksum: Some(checksum(content)),
                updated_at: *updated_at,
            })
            .collect())
    }

    async fn get_asset(&self, _theme_id: u64, key: &str) -> Result<Vec<u8>, RemoteError> {
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
        self.puts.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        {
            let mut by_key = self.active_by_key.lock();
            let count = by_key.entry(key.to_string()).or_default();
            *count += 1;
            self.max_active_per_key.fetch_max(*count, Ordering::SeqCst);
        }

        let delay = *self.put_delay.lock();
        tokio::time::sleep(delay).await;

        let updated_at = self.tick();
        self.assets
            .lock()
            .insert(key.to_string(), (content.to_vec(), updated_at));

        self.active.fetch_sub(1, Ordering::SeqCst);
        if let Some(count) = self.active_by_key.lock().get_mut(key) {
            *count -= 1;
        }

        Ok(RemoteAsset {
            key: key.to_string(),
            checksum: Some(checksum(content)),
            updated_at,
        })
    }

    async fn delete_asset(&self, _theme_id: u64, key: &str) -> Result<(), RemoteError> {
        self.assets.lock().remove(key);
        Ok(())
    }
}

/// Storefront stand-in: every request gets the same HTML page.
#[derive(Default)]
pub struct FakeStorefront {
    requests: Mutex<Vec<String>>,
    body: Mutex<String>,
}

impl FakeStorefront {
    pub fn new(body: &str) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            body: Mutex::new(body.to_string()),
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Upstream for FakeStorefront {
    async fn send(
        &self,
        _method: Method,
        url: &str,
        _headers: HeaderMap,
        _body: Bytes,
    ) -> Result<UpstreamResponse, RemoteError> {
        self.requests.lock().push(url.to_string());
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        Ok(UpstreamResponse {
            status: StatusCode::OK,
            headers,
            body: Bytes::from(self.body.lock().clone()),
        })
    }
}
