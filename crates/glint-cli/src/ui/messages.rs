//! Status message functions for terminal output.

use owo_colors::OwoColorize;
use std::time::Duration;

pub fn success(message: &str) {
    eprintln!("{} {}", "✓".green().bold(), message);
}

pub fn info(message: &str) {
    eprintln!("{} {}", "ℹ".blue().bold(), message);
}

pub fn warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow().bold(), message.yellow());
}

pub fn error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}

/// Print a debug message to stderr (only if RUST_LOG is set).
pub fn debug(message: &str) {
    if std::env::var("RUST_LOG").is_ok() {
        eprintln!("{} {}", "◆".dimmed(), message.dimmed());
    }
}

/// Report an asset that could not be synced. The session keeps running.
pub fn sync_failure(key: &str, reason: &str) {
    eprintln!(
        "{} {} {}",
        "✗".red().bold(),
        format!("Failed to sync {}:", key).red(),
        reason
    );
}

/// Report a remote edit that collided with a local one.
pub fn conflict(key: &str, resolution: &str) {
    eprintln!(
        "{} {} {}",
        "⚠".yellow().bold(),
        format!("{} was edited both locally and in the online editor:", key).yellow(),
        resolution
    );
}

/// Format a duration for status lines ("850ms", "2.40s", "1m 05s").
///
/// ```
/// use std::time::Duration;
/// use glint_cli::ui::format_duration;
///
/// assert_eq!(format_duration(Duration::from_millis(850)), "850ms");
/// assert_eq!(format_duration(Duration::from_millis(2400)), "2.40s");
/// assert_eq!(format_duration(Duration::from_secs(65)), "1m 05s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let ms = duration.as_millis();
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        let secs = duration.as_secs();
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}
