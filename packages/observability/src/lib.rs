//! # Observability
//!
//! Structured logging bootstrap for the session-sync workspace.
//!
//! Library crates only emit `tracing` events. Binaries call
//! [`init_with_config`] once at startup, which installs:
//!
//! - a JSONL sink appending one object per event to a central file
//!   (`~/.session-sync/logs/dev.jsonl` unless overridden), and
//! - an optional compact stderr layer for foreground use.
//!
//! The filter comes from `RUST_LOG` when set, otherwise from
//! [`LogConfig::default_level`].
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "syncctl".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! });
//! tracing::info!("ready");
//! ```

mod file_sink;
mod json_layer;

use std::path::PathBuf;

pub use file_sink::CentralLogWriter;
pub use json_layer::{JsonLayer, LogEntry};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service (e.g., "syncctl", "runtime").
    /// Included in every log line for filtering.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Optional custom log file path.
    /// Defaults to `~/.session-sync/logs/dev.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Also emit logs to stderr for immediate feedback.
    pub also_stderr: bool,

    /// Disable the JSONL file sink entirely (stderr only).
    pub file_sink: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
            file_sink: true,
        }
    }
}

/// Initialize the observability layer with default settings.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize the observability layer with custom configuration.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_with_config(config: LogConfig) {
    file_sink::init_subscriber(&config);
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;
