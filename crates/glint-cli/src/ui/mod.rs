//! Terminal UI utilities for the dev server.
//!
//! Status lines go to stderr so stdout stays free for piping. Colour output
//! follows `NO_COLOR` / `FORCE_COLOR` and falls back to TTY detection.
//!
//! ```no_run
//! use glint_cli::ui;
//!
//! ui::init_colors();
//! let progress = ui::SyncProgress::new("Syncing theme #1234 on example.myshopify.com");
//! progress.set_total(12);
//! progress.inc("templates/index.json");
//! progress.finish("Theme synced");
//! ui::success("Serving ./my-theme");
//! ```

mod messages;
mod spinner;

pub use messages::{conflict, debug, error, format_duration, info, success, sync_failure, warning};
pub use spinner::SyncProgress;

/// Check if running in a CI environment.
pub fn is_ci() -> bool {
    std::env::var("CI").is_ok()
        || std::env::var("GITHUB_ACTIONS").is_ok()
        || std::env::var("GITLAB_CI").is_ok()
        || std::env::var("CIRCLECI").is_ok()
        || std::env::var("BUILDKITE").is_ok()
}

/// Check if color output should be enabled.
///
/// `NO_COLOR` wins over `FORCE_COLOR`; otherwise stderr must be a terminal.
pub fn should_use_color() -> bool {
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    if std::env::var("FORCE_COLOR").is_ok() {
        return true;
    }

    console::user_attended_stderr()
}

/// Initialize color support based on environment.
///
/// `owo-colors` checks the same variables on its own; `console` needs to be
/// told so spinner output matches.
pub fn init_colors() {
    let enabled = should_use_color();
    console::set_colors_enabled_stderr(enabled);
}
