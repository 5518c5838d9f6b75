//! Progress indicator for the initial theme sync.

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::time::Duration;

/// Spinner that turns into a counter once the number of assets is known.
///
/// Hidden automatically when stderr is not a terminal.
pub struct SyncProgress {
    pb: ProgressBar,
}

impl SyncProgress {
    pub fn new(message: &str) -> Self {
        let pb = if super::is_ci() {
            ProgressBar::hidden()
        } else {
            ProgressBar::new_spinner()
        };
        pb.set_style(spinner_style());
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));

        Self { pb }
    }

    /// Switch to counting mode with `total` assets to sync.
    pub fn set_total(&self, total: u64) {
        self.pb.set_length(total);
        if let Ok(style) =
            ProgressStyle::default_spinner().template("{spinner:.cyan} {msg} [{pos}/{len}]")
        {
            self.pb.set_style(style.tick_strings(TICKS));
        }
    }

    /// Count one finished asset.
    pub fn inc(&self, key: &str) {
        self.pb.inc(1);
        self.pb.set_prefix(key.to_string());
    }

    pub fn set_message(&self, message: &str) {
        self.pb.set_message(message.to_string());
    }

    pub fn finish(&self, message: &str) {
        self.pb
            .finish_with_message(format!("{} {}", "✓".green(), message));
    }

    pub fn fail(&self, message: &str) {
        self.pb
            .finish_with_message(format!("{} {}", "✗".red(), message));
    }
}

const TICKS: &[&str] = &["◐", "◓", "◑", "◒"];

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(TICKS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_lifecycle() {
        let progress = SyncProgress::new("Syncing theme");
        progress.set_total(3);
        progress.inc("assets/theme.css");
        progress.set_message("Uploading");
        progress.finish("Done");
    }

    #[test]
    fn test_progress_fail() {
        let progress = SyncProgress::new("Syncing theme");
        progress.fail("Failed");
    }
}
