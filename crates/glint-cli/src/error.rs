//! Error handling for the Glint CLI.
//!
//! Errors are classified at the component that raises them:
//!
//! - **Startup errors** (`StartupError`) abort `glint serve` with a remediation hint
//! - **Sync errors** (`SyncError`) are logged per asset; the session keeps running
//! - **Remote errors** (`RemoteError`) classify responses from the remote theme API
//! - **Top-level errors** (`CliError`) wrap everything else via `#[from]`
//!
//! Only `StartupError` is allowed to propagate out of the dev server; every
//! other class is contained and reported through `ui` and `tracing`.

use std::path::PathBuf;
use thiserror::Error;

pub mod miette;

pub use self::miette::cli_error_to_miette;

/// Top-level CLI error type.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration-related errors (file not found, invalid values, etc.)
    #[error("Configuration error: {0}")]
    Config(#[from] glint_config::ConfigError),

    /// Fatal dev server startup failures
    #[error(transparent)]
    Startup(#[from] StartupError),

    /// Remote theme API failures outside of startup
    #[error("Remote theme API error: {0}")]
    Remote(#[from] RemoteError),

    /// The initial sync could not scan the working copy
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Invalid command-line arguments or options
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// File or directory not found
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// I/O errors from file system operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Development server errors
    #[error("Server error: {0}")]
    Server(String),

    /// File watching errors
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// Generic errors with custom messages
    #[error("{0}")]
    Custom(String),
}

/// Conditions that stop `glint serve` before it starts serving.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Address {address} is already in use\n\nHint: Try a different port with --port <PORT>")]
    AddressInUse { address: String },

    #[error("Error binding to the address {host}\n\nHint: Check --host, it must be a local interface")]
    AddressNotBindable { host: String },

    #[error("Access to {store} was denied (401)\n\nHint: Log in again and make sure the token belongs to {store}")]
    Unauthorized { store: String },

    #[error("You are not allowed to edit themes on {store} (403)\n\nHint: Ensure you are a user of {store} with theme permissions")]
    Forbidden { store: String },

    #[error("Theme \"{identifier}\" doesn't exist\n\nHint: Pass a theme id or exact theme name with --theme")]
    ThemeNotFound { identifier: String },
}

/// Failures talking to the remote theme API, classified by status.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("{what} not found")]
    NotFound { what: String },

    /// The API refused the write, e.g. a Liquid syntax error (422)
    #[error("rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Throttled (429) or 5xx; worth retrying
    #[error("temporarily unavailable ({status})")]
    Unavailable { status: u16 },

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::Unavailable { .. } | RemoteError::Timeout | RemoteError::Transport(_)
        )
    }

    /// Map an auth failure to the startup error reported to the user.
    pub fn into_startup(self, store: &str) -> CliError {
        match self {
            RemoteError::Unauthorized => StartupError::Unauthorized {
                store: store.to_string(),
            }
            .into(),
            RemoteError::Forbidden => StartupError::Forbidden {
                store: store.to_string(),
            }
            .into(),
            other => other.into(),
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout
        } else if err.is_decode() {
            RemoteError::Decode(err.to_string())
        } else {
            RemoteError::Transport(err.to_string())
        }
    }
}

/// A single asset failed to sync. Non-fatal.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{key}: {source}")]
    Remote {
        key: String,
        #[source]
        source: RemoteError,
    },

    #[error("{key}: gave up after {attempts} attempts ({source})")]
    Exhausted {
        key: String,
        attempts: u32,
        #[source]
        source: RemoteError,
    },

    #[error("{key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{key}: abandoned during shutdown")]
    Abandoned { key: String },
}

impl SyncError {
    pub fn key(&self) -> &str {
        match self {
            SyncError::Remote { key, .. }
            | SyncError::Exhausted { key, .. }
            | SyncError::Io { key, .. }
            | SyncError::Abandoned { key } => key,
        }
    }
}

/// Result type alias using `CliError` as the default error type.
pub type Result<T, E = CliError> = std::result::Result<T, E>;

/// Extension trait for adding context to `Result` types.
pub trait ResultExt<T> {
    /// Add a file path to the error context.
    ///
    /// ```rust,no_run
    /// # use std::path::Path;
    /// # use glint_cli::error::{Result, ResultExt};
    /// # fn run() -> Result<()> {
    /// let path = Path::new("layout/theme.liquid");
    /// std::fs::read_to_string(path).with_path(path)?;
    /// # Ok(())
    /// # }
    /// ```
    fn with_path(self, path: impl AsRef<std::path::Path>) -> Result<T>;

    /// Add a helpful hint to the error context.
    fn with_hint(self, hint: impl std::fmt::Display) -> Result<T>;

    /// Prefix the error with a message.
    fn context(self, msg: impl std::fmt::Display) -> Result<T>;
}

impl<T, E: Into<CliError>> ResultExt<T> for std::result::Result<T, E> {
    fn with_path(self, path: impl AsRef<std::path::Path>) -> Result<T> {
        self.map_err(|e| {
            let err: CliError = e.into();
            match err {
                CliError::Io(io_err) if io_err.kind() == std::io::ErrorKind::NotFound => {
                    CliError::FileNotFound(path.as_ref().to_path_buf())
                }
                other => other,
            }
        })
    }

    fn with_hint(self, hint: impl std::fmt::Display) -> Result<T> {
        self.map_err(|e| {
            let err: CliError = e.into();
            CliError::Custom(format!("{}\n\nHint: {}", err, hint))
        })
    }

    fn context(self, msg: impl std::fmt::Display) -> Result<T> {
        self.map_err(|e| {
            let err: CliError = e.into();
            CliError::Custom(format!("{}: {}", msg, err))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_errors_carry_hints() {
        let errors: Vec<StartupError> = vec![
            StartupError::AddressInUse {
                address: "http://127.0.0.1:9292".into(),
            },
            StartupError::AddressNotBindable {
                host: "10.9.9.9".into(),
            },
            StartupError::Unauthorized {
                store: "shop.myshopify.com".into(),
            },
            StartupError::Forbidden {
                store: "shop.myshopify.com".into(),
            },
            StartupError::ThemeNotFound {
                identifier: "Dawn".into(),
            },
        ];

        for err in errors {
            assert!(err.to_string().contains("Hint:"), "{err}");
        }
    }

    #[test]
    fn test_remote_error_into_startup() {
        let err = RemoteError::Forbidden.into_startup("shop.myshopify.com");
        assert!(matches!(
            err,
            CliError::Startup(StartupError::Forbidden { .. })
        ));

        let err = RemoteError::Unauthorized.into_startup("shop.myshopify.com");
        assert!(matches!(
            err,
            CliError::Startup(StartupError::Unauthorized { .. })
        ));

        let err = RemoteError::Timeout.into_startup("shop.myshopify.com");
        assert!(matches!(err, CliError::Remote(RemoteError::Timeout)));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(RemoteError::Unavailable { status: 503 }.is_retryable());
        assert!(RemoteError::Timeout.is_retryable());
        assert!(!RemoteError::Rejected {
            status: 422,
            message: "Liquid syntax error".into()
        }
        .is_retryable());
        assert!(!RemoteError::Unauthorized.is_retryable());
    }

    #[test]
    fn test_sync_error_key() {
        let err = SyncError::Abandoned {
            key: "assets/theme.css".into(),
        };
        assert_eq!(err.key(), "assets/theme.css");
        assert!(err.to_string().contains("abandoned"));
    }

    #[test]
    fn test_result_ext_with_path() {
        let result: std::io::Result<()> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));

        let err = result.with_path("/theme/layout/theme.liquid").unwrap_err();
        assert!(matches!(err, CliError::FileNotFound(_)));
    }

    #[test]
    fn test_result_ext_with_hint() {
        let result: std::result::Result<(), glint_config::ConfigError> =
            Err(glint_config::ConfigError::NotFound);

        let err = result.with_hint("Create glint.toml").unwrap_err();
        assert!(err.to_string().contains("Hint: Create glint.toml"));
    }

    #[test]
    fn test_result_ext_context() {
        let result: std::result::Result<(), glint_config::ConfigError> =
            Err(glint_config::ConfigError::NotFound);

        let err = result.context("Failed to load settings").unwrap_err();
        assert!(err.to_string().contains("Failed to load settings"));
    }
}
