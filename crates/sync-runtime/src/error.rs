//! Runtime construction errors.

use api_transport::TransportError;
use sync_config_and_utils::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration or filesystem failure
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The HTTP transport could not be built
    #[error("Transport setup failed: {0}")]
    Transport(#[from] TransportError),
}

/// Result type alias using RuntimeError.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
