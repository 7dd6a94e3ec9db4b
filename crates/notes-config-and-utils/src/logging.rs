//! Logging initialization for the notes binaries.

use crate::Paths;

/// Initialize logging for a notes binary.
///
/// Events are appended as JSONL to `<base>/logs/notes.jsonl`; warnings and
/// errors are mirrored to stderr. `RUST_LOG` overrides `level`.
pub fn init_logging(service_name: &str, level: &str, paths: &Paths) {
    observability::init_with_config(observability::LogConfig {
        service_name: service_name.into(),
        default_level: parse_level(level).as_str().to_ascii_lowercase(),
        log_path: Some(paths.log_file()),
        also_stderr: true,
    });
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
