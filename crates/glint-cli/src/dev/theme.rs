//! The theme being served, resolved once at startup.

use std::path::{Path, PathBuf};

use crate::dev::remote::{RemoteApi, RemoteTheme};
use crate::error::{Result, StartupError};

pub const DEVELOPMENT_ROLE: &str = "development";

const MAX_THEME_NAME: usize = 50;

/// Immutable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Theme {
    pub id: u64,
    pub name: String,
    pub role: String,
    pub store: String,
    pub root: PathBuf,
}

impl Theme {
    pub fn from_remote(remote: RemoteTheme, store: &str, root: &Path) -> Self {
        Self {
            id: remote.id,
            name: remote.name,
            role: remote.role,
            store: store.to_string(),
            root: root.to_path_buf(),
        }
    }

    pub fn editor_url(&self) -> String {
        format!("https://{}/admin/themes/{}/editor", self.store, self.id)
    }

    pub fn preview_url(&self) -> String {
        format!("https://{}/?preview_theme_id={}", self.store, self.id)
    }

    pub fn is_development(&self) -> bool {
        self.role == DEVELOPMENT_ROLE
    }
}

/// Find the theme named by `identifier` (numeric id or exact name), or the
/// developer's own development theme when none is given, creating it if needed.
pub async fn resolve(
    api: &dyn RemoteApi,
    store: &str,
    root: &Path,
    identifier: Option<&str>,
) -> Result<Theme> {
    let themes = api
        .list_themes()
        .await
        .map_err(|e| e.into_startup(store))?;

    let remote = match identifier {
        Some(identifier) => find(&themes, identifier)
            .cloned()
            .ok_or_else(|| StartupError::ThemeNotFound {
                identifier: identifier.to_string(),
            })?,
        None => {
            let name = development_theme_name();
            match themes
                .iter()
                .find(|t| t.role == DEVELOPMENT_ROLE && t.name == name)
            {
                Some(existing) => existing.clone(),
                None => {
                    tracing::info!(%name, "creating development theme");
                    api.create_theme(&name, DEVELOPMENT_ROLE)
                        .await
                        .map_err(|e| e.into_startup(store))?
                }
            }
        }
    };

    Ok(Theme::from_remote(remote, store, root))
}

fn find<'a>(themes: &'a [RemoteTheme], identifier: &str) -> Option<&'a RemoteTheme> {
    if let Ok(id) = identifier.parse::<u64>() {
        if let Some(theme) = themes.iter().find(|t| t.id == id) {
            return Some(theme);
        }
    }
    themes.iter().find(|t| t.name == identifier)
}

/// `Development (<hostname>)`, capped at the platform's name length.
pub fn development_theme_name() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "local".to_string());

    let name = format!("Development ({})", host.trim());
    if name.chars().count() <= MAX_THEME_NAME {
        return name;
    }

    let mut truncated: String = name.chars().take(MAX_THEME_NAME - 1).collect();
    truncated.push(')');
    truncated
}
