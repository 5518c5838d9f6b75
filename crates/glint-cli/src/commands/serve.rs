//! `glint serve` command implementation.
//!
//! Resolves the layered configuration, builds the remote collaborators and
//! hands them to [`DevServerController`]. Configuration sources, lowest to
//! highest: defaults, `glint.toml`, `GLINT_*` environment, command line.

use figment::providers::Serialized;
use glint_config::{ConfigDiscovery, ConfigError, LiveReload, ServeConfig};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cli::ServeArgs;
use crate::dev::{
    AdminApiClient, CertificateProvider, DevServerController, DevServerOptions, HttpUpstream,
    PemFileProvider,
};
use crate::error::Result;
use crate::ui;

/// Execute the serve command and block until Ctrl+C.
pub async fn execute(args: ServeArgs) -> Result<()> {
    let session = ServeSession::start(args).await?;
    session.run().await
}

/// A running `glint serve`.
pub struct ServeSession {
    controller: DevServerController,
}

impl ServeSession {
    pub async fn start(args: ServeArgs) -> Result<Self> {
        let (root, config) = resolve_config(&args)?;
        ui::info(&format!("Serving {} for {}", root.display(), config.store.as_deref().unwrap_or_default()));

        let token = config.password.clone().ok_or_else(|| ConfigError::MissingField {
            field: "password".to_string(),
            hint: "Set GLINT_PASSWORD to a theme access token for the store".to_string(),
        })?;
        let store = config.store.clone().unwrap_or_default();
        let timeout = Duration::from_secs(config.sync.request_timeout_secs);

        let api = AdminApiClient::new(&store, &config.api_version, token, timeout)?;
        let upstream = HttpUpstream::new(timeout)?;
        let certificates = certificate_provider(&config, &root);
        let open = config.open;

        let controller = DevServerController::start(DevServerOptions {
            config,
            root,
            api: Arc::new(api),
            upstream: Arc::new(upstream),
            certificates,
        })
        .await?;

        if open {
            open_browser(controller.address());
        }
        ui::info("Press Ctrl+C to stop");

        Ok(Self { controller })
    }

    pub async fn run(&self) -> Result<()> {
        self.controller.run().await
    }

    pub async fn stop(&self) {
        self.controller.stop().await;
    }

    pub fn controller(&self) -> &DevServerController {
        &self.controller
    }
}

/// Command-line values that override the config file. Unset flags are left
/// out so they don't mask lower layers.
#[derive(Debug, Default, Serialize)]
struct CliOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    store: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    theme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    poll: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    editor_sync: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    live_reload: Option<LiveReload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    open: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    https: Option<HttpsOverrides>,
}

#[derive(Debug, Default, Serialize)]
struct HttpsOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    cert: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<PathBuf>,
}

impl CliOverrides {
    fn from_args(args: &ServeArgs) -> Self {
        Self {
            store: args.store.clone(),
            host: args.host.clone(),
            port: args.port,
            theme: args.theme.clone(),
            poll: args.poll.then_some(true),
            editor_sync: args.editor_sync.then_some(true),
            live_reload: args.live_reload.map(Into::into),
            open: args.open.then_some(true),
            https: args.https.then(|| HttpsOverrides {
                cert: args.cert.as_deref().map(absolute),
                key: args.key.as_deref().map(absolute),
            }),
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Canonical theme root and the fully layered, validated configuration.
pub fn resolve_config(args: &ServeArgs) -> Result<(PathBuf, ServeConfig)> {
    let root = args
        .root
        .canonicalize()
        .map_err(|_| ConfigError::RootNotFound {
            path: args.root.clone(),
        })?;

    let mut discovery = ConfigDiscovery::new(&root);
    if let Some(path) = &args.config {
        discovery = discovery.with_file(absolute(path));
    }

    let mut config: ServeConfig = discovery
        .figment()?
        .merge(Serialized::defaults(CliOverrides::from_args(args)))
        .extract()
        .map_err(ConfigError::from)?;
    config.ignore.extend(args.ignore.iter().cloned());

    glint_config::validate(&config, &root)?;
    Ok((root, config))
}

/// PEM files from `[https]`, relative to the theme root.
fn certificate_provider(config: &ServeConfig, root: &Path) -> Option<Box<dyn CertificateProvider>> {
    let https = config.https.as_ref()?;
    match (&https.cert, &https.key) {
        (Some(cert), Some(key)) => Some(Box::new(PemFileProvider::new(root.join(cert), root.join(key)))),
        _ => {
            ui::warning("HTTPS needs both a certificate and a key (--cert, --key), serving over HTTP");
            None
        }
    }
}

/// Open the server URL in the default browser.
///
/// Uses platform-specific commands:
/// - macOS: `open`
/// - Windows: `start`
/// - Linux: `xdg-open`
fn open_browser(url: &str) {
    use std::process::Command;

    let result = if cfg!(target_os = "macos") {
        Command::new("open").arg(url).spawn()
    } else if cfg!(target_os = "windows") {
        Command::new("cmd").args(["/C", "start", url]).spawn()
    } else {
        Command::new("xdg-open").arg(url).spawn()
    };

    match result {
        Ok(_) => ui::info(&format!("Opened browser at {}", url)),
        Err(e) => ui::warning(&format!("Failed to open browser: {}", e)),
    }
}
