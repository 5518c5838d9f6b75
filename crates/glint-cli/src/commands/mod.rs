//! Command implementations for the Glint CLI.
//!
//! - [`serve`] - Theme development server
//!
//! Each command provides an `execute` function that takes the parsed
//! arguments and returns a Result.

pub mod serve;

pub use serve::execute as serve_execute;
