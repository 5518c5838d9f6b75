//! Theme development server configuration types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;

/// Settings for `glint serve`.
///
/// Loaded from built-in defaults, `glint.toml`, `GLINT_*` environment
/// variables and finally CLI flags (see [`crate::ConfigDiscovery`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServeConfig {
    /// Store domain, e.g. `example.myshopify.com`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,

    /// Admin API access token. Obtained by the session layer, never written back.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Theme identifier: numeric id or theme name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,

    /// Force the polling file watcher
    #[serde(default)]
    pub poll: bool,

    /// Pull edits made in the online editor back into the working copy
    #[serde(default)]
    pub editor_sync: bool,

    #[serde(default)]
    pub live_reload: LiveReload,

    #[serde(default)]
    pub open: bool,

    /// Extra ignore patterns (gitignore syntax) on top of the ignore file
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore: Vec<String>,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub watch: WatchSettings,

    #[serde(default)]
    pub remote: RemoteSettings,

    #[serde(default)]
    pub reload: ReloadSettings,

    #[serde(default)]
    pub conflict: ConflictSettings,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https: Option<HttpsConfig>,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            store: None,
            password: None,
            api_version: default_api_version(),
            host: default_host(),
            port: default_port(),
            theme: None,
            poll: false,
            editor_sync: false,
            live_reload: LiveReload::default(),
            open: false,
            ignore: Vec::new(),
            sync: SyncSettings::default(),
            watch: WatchSettings::default(),
            remote: RemoteSettings::default(),
            reload: ReloadSettings::default(),
            conflict: ConflictSettings::default(),
            https: None,
        }
    }
}

impl ServeConfig {
    /// Address string the dev server listens on, e.g. `http://127.0.0.1:9292`.
    pub fn address(&self, https: bool) -> String {
        let scheme = if https { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

/// How connected browsers react to changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LiveReload {
    /// Swap stylesheets and sections in place where possible
    #[default]
    HotReload,
    /// Always reload the whole page
    FullPage,
    /// No script injection, no notifications
    Off,
}

impl LiveReload {
    pub fn as_str(&self) -> &'static str {
        match self {
            LiveReload::HotReload => "hot-reload",
            LiveReload::FullPage => "full-page",
            LiveReload::Off => "off",
        }
    }
}

impl fmt::Display for LiveReload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LiveReload {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hot-reload" => Ok(LiveReload::HotReload),
            "full-page" => Ok(LiveReload::FullPage),
            "off" => Ok(LiveReload::Off),
            other => Err(ConfigError::InvalidValue {
                field: "live_reload".to_string(),
                hint: Some(format!(
                    "'{other}' is not one of hot-reload, full-page, off"
                )),
            }),
        }
    }
}

/// Upload worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncSettings {
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Attempts per task before it is reported as a sync failure
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial retry delay, doubled after every failed attempt
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Upper bound for in-flight work during shutdown
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchSettings {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteSettings {
    #[serde(default = "default_remote_poll_secs")]
    pub poll_interval_secs: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_remote_poll_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReloadSettings {
    /// Window in which directives collapse into one
    #[serde(default = "default_coalesce_ms")]
    pub coalesce_ms: u64,

    /// Messages buffered per browser before the oldest is dropped
    #[serde(default = "default_client_buffer")]
    pub client_buffer: usize,

    /// Re-render edited sections in place instead of reloading the page
    #[serde(default)]
    pub section_hot_reload: bool,
}

impl Default for ReloadSettings {
    fn default() -> Self {
        Self {
            coalesce_ms: default_coalesce_ms(),
            client_buffer: default_client_buffer(),
            section_hot_reload: false,
        }
    }
}

/// Tie-break between a remote edit and a queued local upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConflictSettings {
    /// When timestamps are equal the pending local upload wins
    #[serde(default = "default_ties_favor_local")]
    pub ties_favor_local: bool,
}

impl Default for ConflictSettings {
    fn default() -> Self {
        Self {
            ties_favor_local: default_ties_favor_local(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HttpsConfig {
    #[serde(default)]
    pub cert: Option<PathBuf>,

    #[serde(default)]
    pub key: Option<PathBuf>,
}

fn default_api_version() -> String {
    "2024-01".into()
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    9292
}

fn default_workers() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    4
}

fn default_backoff_ms() -> u64 {
    250
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_remote_poll_secs() -> u64 {
    3
}

fn default_coalesce_ms() -> u64 {
    100
}

fn default_client_buffer() -> usize {
    32
}

fn default_ties_favor_local() -> bool {
    true
}
