pub mod discovery;
pub mod error;
pub mod serve;
pub mod validation;

// Re-export main types
pub use discovery::{discover, ConfigDiscovery, CONFIG_FILE_NAME, ENV_PREFIX};
pub use error::*;
pub use serve::*;
pub use validation::{validate, ConfigValidator, FsValidator, SchemaValidator};
