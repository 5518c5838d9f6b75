//! Command-line interface definition for Glint.
//!
//! # Command Structure
//!
//! - `glint serve [ROOT]` - Theme development server with live reload

mod commands;
pub mod enums;
mod tests;
mod validation;

use clap::Parser;

pub use commands::{Command, ServeArgs};
pub use enums::*;
pub use validation::parse_store;

/// Glint - theme development server
#[derive(Parser, Debug)]
#[command(
    name = "glint",
    version,
    about = "Theme development server with live reload",
    long_about = "Glint serves a local theme against a live storefront.\n\
                  Local edits are uploaded to a development theme and pushed to open\n\
                  browsers, while theme assets are served straight from disk."
)]
pub struct Cli {
    /// Enable verbose logging (debug level)
    ///
    /// Shows every sync task, watcher event and proxied request.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    ///
    /// Outputs plain text without ANSI color codes. Useful for logging to
    /// files or systems that don't support colored terminal output.
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}
