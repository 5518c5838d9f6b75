//! File-based config discovery for CLI use
//!
//! Finds `glint.toml` in the theme root and layers it between the built-in
//! defaults and `GLINT_*` environment variables.

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;

use crate::error::{ConfigError, Result};
use crate::serve::ServeConfig;

/// Name of the per-theme configuration file.
pub const CONFIG_FILE_NAME: &str = "glint.toml";

/// Prefix for environment overrides (`GLINT_PORT`, `GLINT_SYNC__WORKERS`, ...).
pub const ENV_PREFIX: &str = "GLINT_";

/// File-based configuration discovery
///
/// # Example
///
/// ```no_run
/// use glint_config::ConfigDiscovery;
///
/// let discovery = ConfigDiscovery::new("./my-theme");
/// let config = discovery.load().unwrap();
/// ```
pub struct ConfigDiscovery {
    root: PathBuf,
    explicit: Option<PathBuf>,
}

impl ConfigDiscovery {
    /// Create a new config discovery with a root directory
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            explicit: None,
        }
    }

    /// Use a config file at a specific path instead of `<root>/glint.toml`.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.explicit = Some(path.as_ref().to_path_buf());
        self
    }

    /// Find the configuration file.
    ///
    /// An explicit path always wins; it is returned even when missing so the
    /// load step reports it.
    pub fn find(&self) -> Option<PathBuf> {
        if let Some(path) = &self.explicit {
            return Some(path.clone());
        }

        let toml_path = self.root.join(CONFIG_FILE_NAME);
        toml_path.exists().then_some(toml_path)
    }

    /// Build the layered figment: defaults, then the file, then environment.
    ///
    /// Callers merge CLI overrides on top before extracting.
    pub fn figment(&self) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(ServeConfig::default()));

        if let Some(path) = self.find() {
            if !path.exists() {
                return Err(ConfigError::NotFound);
            }
            tracing::debug!("loading config from {}", path.display());
            figment = figment.merge(Toml::file(path));
        }

        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load and extract the configuration.
    pub fn load(&self) -> Result<ServeConfig> {
        Ok(self.figment()?.extract()?)
    }
}

/// Discover and load config for a theme root (convenience function)
///
/// # Example
///
/// ```no_run
/// let config = glint_config::discover(".").unwrap();
/// ```
pub fn discover(root: impl AsRef<Path>) -> Result<ServeConfig> {
    ConfigDiscovery::new(root).load()
}
