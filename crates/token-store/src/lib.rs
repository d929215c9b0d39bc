//! Persisted storage for the session bearer token.
//!
//! The crate is split in two layers:
//! - [`SecureStorage`]: a string key-value backend ([`MemoryStorage`],
//!   [`FileStorage`], or anything the embedding application provides).
//! - [`TokenStore`]: the single-key view used by the session manager. It is
//!   the only writer of the token; everything else reads through a cloneable
//!   [`TokenReader`].

mod file;
mod keys;
mod memory;
mod token;
mod traits;

pub use file::FileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use token::{TokenReader, TokenStore};
pub use traits::SecureStorage;

use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend-specific failure
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Encoding(err.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
