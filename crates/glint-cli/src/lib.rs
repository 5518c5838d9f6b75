//! Glint CLI - theme development server.
//!
//! `glint serve` keeps a local theme directory in sync with a remote
//! development theme and serves the live storefront through a local proxy,
//! answering theme assets from disk and reloading open browsers on change.
//!
//! # Architecture
//!
//! - [`error`] - Error types with actionable messages
//! - [`logger`] - Structured logging with tracing
//! - [`ui`] - Terminal status lines and progress
//! - [`cli`] - Argument definitions
//! - [`commands`] - Command implementations
//! - [`dev`] - The development server itself
//!
//! # Example
//!
//! ```rust
//! use glint_cli::{error::Result, logger};
//!
//! fn main() -> Result<()> {
//!     logger::init_logger(false, false, false);
//!     // CLI command implementations...
//!     Ok(())
//! }
//! ```

// Public modules
pub mod cli;
pub mod commands;
pub mod dev;
pub mod error;
pub mod logger;
pub mod ui;

// Re-export commonly used types
pub use error::{CliError, RemoteError, Result, ResultExt, StartupError, SyncError};
