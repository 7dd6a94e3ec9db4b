//! Configuration, paths, and logging setup shared by the notes crates.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{Config, StorageBackendKind, DEFAULT_API_BASE_URL, DEFAULT_LOG_LEVEL};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
