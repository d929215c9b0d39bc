//! Logging initialization.
//!
//! Thin wrapper over the `observability` package: every binary in the
//! workspace logs structured JSONL to `<base>/logs/dev.jsonl` and, in
//! foreground mode, to stderr.

use crate::Paths;
use observability::LogConfig;

/// Initialize logging for the default `session-sync` service.
///
/// `level` is used unless `RUST_LOG` is set.
pub fn init_logging(paths: &Paths, level: &str, also_stderr: bool) {
    init_logging_for_service("session-sync", paths, level, also_stderr);
}

/// Initialize logging with a custom service name.
pub fn init_logging_for_service(service_name: &str, paths: &Paths, level: &str, also_stderr: bool) {
    observability::init_with_config(LogConfig {
        service_name: service_name.into(),
        default_level: parse_level(level).to_string().to_lowercase(),
        log_path: Some(paths.log_file()),
        also_stderr,
        ..Default::default()
    });
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.trim().to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
