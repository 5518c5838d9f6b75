//! Reload strategy per asset.
//!
//! | Category | Directive |
//! |----------|-----------|
//! | stylesheet (`.css`, `.scss`, `.css.liquid`) | `css-replace` |
//! | static asset under `assets/` | `css-replace` if the page references it, else `full-page` |
//! | section (opt-in) | `section-replace` |
//! | everything else | `full-page` |

use chrono::{DateTime, Utc};
use glint_config::LiveReload;
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetCategory {
    Stylesheet,
    Script,
    Section,
    SectionGroup,
    Template,
    Layout,
    Snippet,
    Locale,
    Config,
    Static,
}

impl AssetCategory {
    pub fn of(key: &str) -> Self {
        let (dir, name) = key.split_once('/').unwrap_or(("", key));
        match dir {
            "assets" if is_stylesheet(name) => AssetCategory::Stylesheet,
            "assets" if name.ends_with(".js") || name.ends_with(".js.liquid") => {
                AssetCategory::Script
            }
            "assets" => AssetCategory::Static,
            "sections" if name.ends_with(".json") => AssetCategory::SectionGroup,
            "sections" => AssetCategory::Section,
            "templates" => AssetCategory::Template,
            "layout" => AssetCategory::Layout,
            "snippets" => AssetCategory::Snippet,
            "locales" => AssetCategory::Locale,
            _ => AssetCategory::Config,
        }
    }

    /// Served straight from disk, so the browser can react before the
    /// upload finishes.
    pub fn is_served_locally(key: &str) -> bool {
        key.starts_with("assets/") && !key.ends_with(".liquid")
    }
}

fn is_stylesheet(name: &str) -> bool {
    name.ends_with(".css") || name.ends_with(".scss") || name.ends_with(".css.liquid")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReloadMode {
    FullPage,
    CssReplace,
    SectionReplace,
}

/// Message pushed to connected browsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadDirective {
    pub mode: ReloadMode,
    pub keys: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl ReloadDirective {
    pub fn new(mode: ReloadMode, keys: Vec<String>) -> Self {
        Self {
            mode,
            keys,
            generated_at: Utc::now(),
        }
    }

    /// Narrow the directive for one browser. A `css-replace` that touches a
    /// static asset the page doesn't reference (or whose references are
    /// unknown) becomes a full reload.
    pub fn for_page(&self, references: Option<&HashSet<String>>) -> ReloadDirective {
        if self.mode != ReloadMode::CssReplace {
            return self.clone();
        }

        let unreferenced = self.keys.iter().any(|key| {
            AssetCategory::of(key) == AssetCategory::Static
                && !references.is_some_and(|refs| refs.contains(key))
        });

        if unreferenced {
            ReloadDirective {
                mode: ReloadMode::FullPage,
                ..self.clone()
            }
        } else {
            self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadPolicy {
    live_reload: LiveReload,
    section_hot_reload: bool,
}

impl ReloadPolicy {
    pub fn new(live_reload: LiveReload, section_hot_reload: bool) -> Self {
        Self {
            live_reload,
            section_hot_reload,
        }
    }

    pub fn mode_for(&self, key: &str) -> ReloadMode {
        if self.live_reload == LiveReload::FullPage {
            return ReloadMode::FullPage;
        }

        match AssetCategory::of(key) {
            AssetCategory::Stylesheet | AssetCategory::Static => ReloadMode::CssReplace,
            AssetCategory::Section if self.section_hot_reload => ReloadMode::SectionReplace,
            _ => ReloadMode::FullPage,
        }
    }

    /// `None` when live reload is off.
    pub fn directive_for(&self, key: &str) -> Option<ReloadDirective> {
        if self.live_reload == LiveReload::Off {
            return None;
        }
        Some(ReloadDirective::new(self.mode_for(key), vec![key.to_string()]))
    }
}

/// Merge directives that arrived within one coalescing window.
///
/// Any full-page directive, or a mix of partial modes, yields one full-page
/// reload carrying every key.
pub fn coalesce(directives: Vec<ReloadDirective>) -> Option<ReloadDirective> {
    let mut iter = directives.into_iter();
    let mut merged = iter.next()?;

    for directive in iter {
        if directive.mode != merged.mode {
            merged.mode = ReloadMode::FullPage;
        }
        for key in directive.keys {
            if !merged.keys.contains(&key) {
                merged.keys.push(key);
            }
        }
        merged.generated_at = merged.generated_at.max(directive.generated_at);
    }

    Some(merged)
}
