//! Errors raised while loading settings or preparing the state directory.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// A setting parsed but holds a value the sync core cannot run with.
    #[error("Invalid setting `{field}`: {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    /// The config file exists but could not be read or decoded.
    #[error("Could not load config file {}: {source}", path.display())]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid API base URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The home directory could not be resolved.
    #[error("Path error: {0}")]
    Path(String),
}

impl CoreError {
    pub(crate) fn must_be_positive(field: &'static str) -> Self {
        CoreError::InvalidSetting {
            field,
            reason: "must be greater than zero".to_string(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
