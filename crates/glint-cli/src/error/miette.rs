//! Miette diagnostic conversion for CLI errors.

use crate::error::{CliError, StartupError};
use miette::Report;

/// Convert CliError to miette Report
pub fn cli_error_to_miette(err: CliError) -> Report {
    match err {
        CliError::Startup(e) => startup_error_to_miette(e),
        CliError::Config(e) => miette::miette!("Configuration error: {}", e),
        _ => miette::miette!("{}", err),
    }
}

/// Startup failures get a diagnostic code so scripts can tell them apart.
pub fn startup_error_to_miette(err: StartupError) -> Report {
    let code = match &err {
        StartupError::AddressInUse { .. } => "glint::address_in_use",
        StartupError::AddressNotBindable { .. } => "glint::address_not_bindable",
        StartupError::Unauthorized { .. } => "glint::unauthorized",
        StartupError::Forbidden { .. } => "glint::forbidden",
        StartupError::ThemeNotFound { .. } => "glint::theme_not_found",
    };

    miette::miette!(code = code, "{}", err)
}
