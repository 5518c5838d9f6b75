//! Remote theme API.
//!
//! [`RemoteApi`] is the seam between the dev server and the platform's admin
//! REST API. [`AdminApiClient`] is the production implementation; tests swap
//! in an in-memory store.

use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::RemoteError;

/// Theme as listed by the remote API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTheme {
    pub id: u64,
    pub name: String,
    pub role: String,
}

/// One entry of the remote asset listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAsset {
    pub key: String,
    /// MD5 of the stored content. Missing for assets the platform generates.
    #[serde(default)]
    pub checksum: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn list_themes(&self) -> Result<Vec<RemoteTheme>, RemoteError>;

    async fn create_theme(&self, name: &str, role: &str) -> Result<RemoteTheme, RemoteError>;

    async fn list_assets(&self, theme_id: u64) -> Result<Vec<RemoteAsset>, RemoteError>;

    async fn get_asset(&self, theme_id: u64, key: &str) -> Result<Vec<u8>, RemoteError>;

    /// Store `content` under `key`, returning the new listing entry.
    async fn put_asset(
        &self,
        theme_id: u64,
        key: &str,
        content: &[u8],
    ) -> Result<RemoteAsset, RemoteError>;

    async fn delete_asset(&self, theme_id: u64, key: &str) -> Result<(), RemoteError>;
}

/// Admin REST API client.
pub struct AdminApiClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl AdminApiClient {
    pub fn new(
        store: &str,
        api_version: &str,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("glint/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: format!("https://{store}/admin/api/{api_version}"),
            token: token.into(),
        })
    }

    /// Point the client at a different origin (local test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("X-Shopify-Access-Token", &self.token)
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<T, RemoteError> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify(status, what, &body));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

#[derive(Deserialize)]
struct ThemesEnvelope {
    themes: Vec<RemoteTheme>,
}

#[derive(Deserialize)]
struct ThemeEnvelope {
    theme: RemoteTheme,
}

#[derive(Deserialize)]
struct AssetsEnvelope {
    assets: Vec<RemoteAsset>,
}

#[derive(Deserialize)]
struct AssetEnvelope {
    asset: AssetBody,
}

#[derive(Debug, Deserialize)]
struct AssetBody {
    key: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    attachment: Option<String>,
    #[serde(default)]
    checksum: Option<String>,
    updated_at: DateTime<Utc>,
}

impl AssetBody {
    fn content(self) -> Result<Vec<u8>, RemoteError> {
        match (self.value, self.attachment) {
            (Some(value), _) => Ok(value.into_bytes()),
            (None, Some(attachment)) => base64::engine::general_purpose::STANDARD
                .decode(attachment.trim())
                .map_err(|e| RemoteError::Decode(format!("{}: {}", self.key, e))),
            (None, None) => Err(RemoteError::Decode(format!("{}: empty asset", self.key))),
        }
    }

    fn into_listing(self) -> RemoteAsset {
        RemoteAsset {
            key: self.key,
            checksum: self.checksum,
            updated_at: self.updated_at,
        }
    }
}

/// Text goes up as `value`, anything else as base64 `attachment`.
fn asset_payload(key: &str, content: &[u8]) -> serde_json::Value {
    match std::str::from_utf8(content) {
        Ok(text) => serde_json::json!({ "asset": { "key": key, "value": text } }),
        Err(_) => serde_json::json!({
            "asset": {
                "key": key,
                "attachment": base64::engine::general_purpose::STANDARD.encode(content),
            }
        }),
    }
}

/// Map a non-success status to a [`RemoteError`].
pub fn classify(status: StatusCode, what: &str, body: &str) -> RemoteError {
    match status.as_u16() {
        401 => RemoteError::Unauthorized,
        403 => RemoteError::Forbidden,
        404 => RemoteError::NotFound {
            what: what.to_string(),
        },
        429 | 500..=599 => RemoteError::Unavailable {
            status: status.as_u16(),
        },
        code => RemoteError::Rejected {
            status: code,
            message: error_message(body),
        },
    }
}

/// Pull the human-readable part out of `{"errors": ...}` bodies.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(json) => match json.get("errors") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => body.trim().to_string(),
        },
        Err(_) => body.trim().to_string(),
    }
}

#[async_trait]
impl RemoteApi for AdminApiClient {
    async fn list_themes(&self) -> Result<Vec<RemoteTheme>, RemoteError> {
        let envelope: ThemesEnvelope = self
            .send(self.request(reqwest::Method::GET, "/themes.json"), "themes")
            .await?;
        Ok(envelope.themes)
    }

    async fn create_theme(&self, name: &str, role: &str) -> Result<RemoteTheme, RemoteError> {
        let body = serde_json::json!({ "theme": { "name": name, "role": role } });
        let envelope: ThemeEnvelope = self
            .send(
                self.request(reqwest::Method::POST, "/themes.json").json(&body),
                "theme",
            )
            .await?;
        Ok(envelope.theme)
    }

    async fn list_assets(&self, theme_id: u64) -> Result<Vec<RemoteAsset>, RemoteError> {
        let path = format!("/themes/{theme_id}/assets.json");
        let envelope: AssetsEnvelope = self
            .send(self.request(reqwest::Method::GET, &path), "theme")
            .await?;
        Ok(envelope.assets)
    }

    async fn get_asset(&self, theme_id: u64, key: &str) -> Result<Vec<u8>, RemoteError> {
        let path = format!("/themes/{theme_id}/assets.json");
        let envelope: AssetEnvelope = self
            .send(
                self.request(reqwest::Method::GET, &path)
                    .query(&[("asset[key]", key)]),
                key,
            )
            .await?;
        envelope.asset.content()
    }

    async fn put_asset(
        &self,
        theme_id: u64,
        key: &str,
        content: &[u8],
    ) -> Result<RemoteAsset, RemoteError> {
        let path = format!("/themes/{theme_id}/assets.json");
        let envelope: AssetEnvelope = self
            .send(
                self.request(reqwest::Method::PUT, &path)
                    .json(&asset_payload(key, content)),
                key,
            )
            .await?;
        Ok(envelope.asset.into_listing())
    }

    async fn delete_asset(&self, theme_id: u64, key: &str) -> Result<(), RemoteError> {
        let path = format!("/themes/{theme_id}/assets.json");
        let _: serde_json::Value = self
            .send(
                self.request(reqwest::Method::DELETE, &path)
                    .query(&[("asset[key]", key)]),
                key,
            )
            .await?;
        Ok(())
    }
}
