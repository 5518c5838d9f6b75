//! Decides which paths under the theme root take part in watching and syncing.

use glint_config::ConfigError;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::{Component, Path};

use crate::error::Result;

/// Name of the per-theme ignore file, gitignore syntax.
pub const IGNORE_FILE_NAME: &str = ".themeignore";

/// Top-level directories the remote theme store knows about.
pub const THEME_DIRECTORIES: &[&str] = &[
    "assets", "config", "layout", "locales", "sections", "snippets", "templates",
];

const DEFAULT_PATTERNS: &[&str] = &["*.swp", "*~", ".DS_Store", "Thumbs.db", "config.yml"];

/// Predicate over asset keys (`sections/header.liquid`).
pub trait ChangeFilter: Send + Sync {
    fn accepts(&self, key: &str) -> bool;
}

/// [`ChangeFilter`] backed by `.themeignore`, built-in patterns and
/// `ignore` entries from the config file.
pub struct IgnoreFilter {
    matcher: Gitignore,
}

impl IgnoreFilter {
    pub fn from_root(root: &Path, extra: &[String]) -> Result<Self> {
        let mut builder = GitignoreBuilder::new(root);

        for pattern in DEFAULT_PATTERNS.iter().copied().chain(extra.iter().map(String::as_str)) {
            builder
                .add_line(None, pattern)
                .map_err(|e| invalid_pattern(pattern, &e))?;
        }

        let ignore_file = root.join(IGNORE_FILE_NAME);
        if ignore_file.is_file() {
            if let Some(err) = builder.add(&ignore_file) {
                return Err(invalid_pattern(IGNORE_FILE_NAME, &err));
            }
            tracing::debug!(path = %ignore_file.display(), "loaded ignore file");
        }

        let matcher = builder
            .build()
            .map_err(|e| invalid_pattern(IGNORE_FILE_NAME, &e))?;

        Ok(Self { matcher })
    }
}

impl ChangeFilter for IgnoreFilter {
    fn accepts(&self, key: &str) -> bool {
        is_theme_key(key)
            && !self
                .matcher
                .matched_path_or_any_parents(Path::new(key), false)
                .is_ignore()
    }
}

/// Whether `key` names a file inside one of the theme directories.
///
/// Hidden components and anything escaping the root are rejected.
pub fn is_theme_key(key: &str) -> bool {
    let mut components = Path::new(key).components();

    let top = match components.next() {
        Some(Component::Normal(top)) => top.to_string_lossy(),
        _ => return false,
    };
    if !THEME_DIRECTORIES.contains(&top.as_ref()) {
        return false;
    }

    let mut depth = 0;
    for component in components {
        match component {
            Component::Normal(name) if !name.to_string_lossy().starts_with('.') => depth += 1,
            _ => return false,
        }
    }
    depth > 0
}

/// Relative, forward-slash key for `path`, or `None` if it is not under `root`.
pub fn asset_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Option<_>>()?;

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn invalid_pattern(source: &str, err: &ignore::Error) -> crate::error::CliError {
    ConfigError::InvalidValue {
        field: "ignore".to_string(),
        hint: Some(format!("{source}: {err}")),
    }
    .into()
}
