//! Backend trait for persisted key-value state.

use crate::StorageResult;

/// A string key-value store that survives process restarts.
///
/// Implementations must be safe to share between the token writer and any
/// number of readers.
pub trait SecureStorage: Send + Sync {
    /// Short backend label used in logs.
    fn backend_name(&self) -> &'static str;

    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Remove `key`. Returns whether a value was present.
    fn delete(&self, key: &str) -> StorageResult<bool>;

    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}
