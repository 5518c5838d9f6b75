//! Pluggable config validation strategies
//!
//! Separates filesystem validation (for CLI use) from schema validation.

use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};
use crate::serve::ServeConfig;

/// Trait for pluggable config validation strategies
pub trait ConfigValidator {
    fn validate(&self, config: &ServeConfig) -> Result<()>;
}

/// Schema-only validation (no filesystem checks)
///
/// # Example
///
/// ```
/// use glint_config::{ConfigValidator, SchemaValidator, ServeConfig};
///
/// let mut config = ServeConfig::default();
/// config.store = Some("example.myshopify.com".into());
///
/// SchemaValidator.validate(&config).unwrap();
/// ```
pub struct SchemaValidator;

impl ConfigValidator for SchemaValidator {
    fn validate(&self, config: &ServeConfig) -> Result<()> {
        match config.store.as_deref().map(str::trim) {
            None | Some("") => {
                return Err(ConfigError::MissingField {
                    field: "store".to_string(),
                    hint: "Pass --store, set GLINT_STORE, or add `store = \"...\"` to glint.toml"
                        .to_string(),
                })
            }
            Some(store) if store.contains('/') => {
                return Err(ConfigError::SchemaValidation {
                    message: format!("store '{store}' must be a bare domain"),
                    hint: Some("Drop the scheme and path, e.g. example.myshopify.com".to_string()),
                })
            }
            Some(_) => {}
        }

        if config.sync.workers == 0 || config.sync.workers > 8 {
            return Err(ConfigError::SchemaValidation {
                message: format!("sync.workers = {} is out of range", config.sync.workers),
                hint: Some("Use between 1 and 8 upload workers".to_string()),
            });
        }

        if config.sync.max_attempts == 0 {
            return Err(ConfigError::SchemaValidation {
                message: "sync.max_attempts must be at least 1".to_string(),
                hint: None,
            });
        }

        if config.watch.debounce_ms == 0 {
            return Err(ConfigError::SchemaValidation {
                message: "watch.debounce_ms must be greater than 0".to_string(),
                hint: Some("300ms is a good default".to_string()),
            });
        }

        if config.reload.client_buffer == 0 {
            return Err(ConfigError::SchemaValidation {
                message: "reload.client_buffer must be greater than 0".to_string(),
                hint: None,
            });
        }

        if config.remote.poll_interval_secs == 0 {
            return Err(ConfigError::SchemaValidation {
                message: "remote.poll_interval_secs must be greater than 0".to_string(),
                hint: None,
            });
        }

        Ok(())
    }
}

/// Filesystem validator (for CLI use)
///
/// Runs [`SchemaValidator`] and then checks that the theme root exists.
/// Certificate files are not checked here; unreadable ones make the server
/// fall back to HTTP.
pub struct FsValidator {
    root: PathBuf,
}

impl FsValidator {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl ConfigValidator for FsValidator {
    fn validate(&self, config: &ServeConfig) -> Result<()> {
        SchemaValidator.validate(config)?;

        if !self.root.is_dir() {
            return Err(ConfigError::RootNotFound {
                path: self.root.clone(),
            });
        }

        Ok(())
    }
}

/// Convenience function for filesystem validation
pub fn validate(config: &ServeConfig, root: impl AsRef<Path>) -> Result<()> {
    FsValidator::new(root).validate(config)
}
