//! # Observability
//!
//! Logging setup for the notes session crates.
//!
//! Library crates only emit `tracing` events. Binaries call
//! [`init`] or [`init_with_config`] once at startup to decide where those
//! events go:
//!
//! - with a `log_path`, every event is appended to a JSONL file
//!   (`tail -f ~/.notes/logs/notes.jsonl | jq`), optionally mirrored to stderr
//! - without one, events are printed to stderr in the compact `fmt` format
//!
//! `RUST_LOG` always wins over the configured default level.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "notes-cli".into(),
//!     default_level: "debug".into(),
//!     log_path: Some(paths.log_file()),
//!     also_stderr: true,
//! });
//! tracing::info!("ready");
//! ```

mod json_layer;
mod sink;

use std::io;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub use json_layer::{JsonLayer, LogEntry};
pub use sink::{AppendWriter, WriterFactory};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service (e.g., "notes-cli").
    /// Included in every JSONL line for filtering.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// JSONL log file. When unset, logs go to stderr only.
    pub log_path: Option<PathBuf>,

    /// Also emit logs to stderr when a `log_path` is set.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize logging to stderr with default settings.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging with custom configuration.
///
/// Calling this more than once is harmless: later calls leave the first
/// subscriber in place. If the log file cannot be opened, logging falls back
/// to stderr.
pub fn init_with_config(config: LogConfig) {
    let Some(log_path) = config.log_path.clone() else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter(&config.default_level))
            .with_target(true)
            .with_writer(io::stderr)
            .compact()
            .try_init();
        return;
    };

    let writer = match AppendWriter::new(&log_path) {
        Ok(writer) => writer,
        Err(e) => {
            eprintln!("failed to open log file {}: {}", log_path.display(), e);
            init_with_config(LogConfig {
                log_path: None,
                ..config
            });
            return;
        }
    };

    let json_layer = JsonLayer::new(config.service_name.clone(), WriterFactory::new(writer));

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter("warn"))
    });

    let installed = tracing_subscriber::registry()
        .with(json_layer.with_filter(env_filter(&config.default_level)))
        .with(stderr_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(log_path = %log_path.display(), "observability initialized");
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "unknown");
        assert_eq!(config.default_level, "info");
        assert!(config.log_path.is_none());
        assert!(!config.also_stderr);
    }

    #[test]
    fn test_repeated_init_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            service_name: "test".into(),
            log_path: Some(dir.path().join("logs").join("test.jsonl")),
            ..Default::default()
        };
        init_with_config(config.clone());
        init_with_config(config);
        init("test");
    }
}
