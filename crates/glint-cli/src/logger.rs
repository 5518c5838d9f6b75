//! Logging setup for the Glint CLI.
//!
//! Diagnostics go through `tracing`; user-facing status lines go through
//! [`crate::ui`]. The two are kept apart so `--quiet` silences tracing output
//! without hiding the served address or sync failures.
//!
//! ```rust,no_run
//! use glint_cli::logger::init_logger;
//! use tracing::{debug, info};
//!
//! init_logger(false, false, false);
//!
//! info!("Starting dev server");
//! debug!(key = "assets/theme.css", "queued upload");
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const VERBOSE_FILTER: &str = "glint=debug,glint_cli=debug,glint_config=debug";
const QUIET_FILTER: &str = "glint=error,glint_cli=error,glint_config=error";
const DEFAULT_FILTER: &str = "glint=info,glint_cli=info,glint_config=info";

/// Initialize the tracing subscriber. Call once, before any logging.
///
/// Level selection, in order:
/// 1. `--verbose`: DEBUG for glint crates
/// 2. `--quiet`: ERROR only
/// 3. `RUST_LOG`
/// 4. INFO for glint crates
pub fn init_logger(verbose: bool, quiet: bool, no_color: bool) {
    init_logger_with_filter(select_filter(verbose, quiet), no_color);
}

/// Initialize logger with a custom environment filter.
///
/// ```rust,no_run
/// use glint_cli::logger::init_logger_with_filter;
/// use tracing_subscriber::EnvFilter;
///
/// let filter = EnvFilter::new("glint_cli=trace,hyper=off");
/// init_logger_with_filter(filter, false);
/// ```
pub fn init_logger_with_filter(filter: EnvFilter, no_color: bool) {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_ansi(!no_color)
        .with_writer(std::io::stderr)
        .compact();

    // A second init (tests, embedding) is not an error worth reporting.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

fn select_filter(verbose: bool, quiet: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else if quiet {
        EnvFilter::new(QUIET_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}
