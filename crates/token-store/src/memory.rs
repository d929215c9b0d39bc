//! Process-local storage backend.

use crate::{SecureStorage, StorageResult};
use parking_lot::Mutex;
use std::collections::HashMap;

/// In-memory storage. Nothing survives the process; used for ephemeral
/// sessions and tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a value, e.g. to simulate a token left by a previous run.
    pub fn with_value(key: &str, value: &str) -> Self {
        let storage = Self::new();
        storage.data.lock().insert(key.to_string(), value.to_string());
        storage
    }
}

impl SecureStorage for MemoryStorage {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.data.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        Ok(self.data.lock().remove(key).is_some())
    }
}
