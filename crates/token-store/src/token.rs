//! Single-key token holder.

use crate::{SecureStorage, StorageKeys, StorageResult};
use std::sync::Arc;
use tracing::debug;

/// Owns the persisted bearer token.
///
/// There is exactly one `TokenStore` per session; the session manager holds
/// it and is the only writer. Other components get a [`TokenReader`].
pub struct TokenStore {
    storage: Arc<dyn SecureStorage>,
}

impl TokenStore {
    pub fn new(storage: Box<dyn SecureStorage>) -> Self {
        Self::from_shared(Arc::from(storage))
    }

    /// Build the store over a backend that [`TokenReader`]s created before
    /// the session exists also read from.
    pub fn from_shared(storage: Arc<dyn SecureStorage>) -> Self {
        Self { storage }
    }

    /// Read the current token, if any.
    pub fn get(&self) -> StorageResult<Option<String>> {
        read_token(self.storage.as_ref())
    }

    /// Persist a token, replacing any previous value.
    pub fn set(&self, token: &str) -> StorageResult<()> {
        debug!(backend = self.storage.backend_name(), "Storing auth token");
        self.storage.set(StorageKeys::AUTH_TOKEN, token)
    }

    /// Remove the token. Clearing an absent token is not an error.
    pub fn clear(&self) -> StorageResult<()> {
        let existed = self.storage.delete(StorageKeys::AUTH_TOKEN)?;
        debug!(backend = self.storage.backend_name(), existed, "Cleared auth token");
        Ok(())
    }

    pub fn has(&self) -> StorageResult<bool> {
        Ok(self.get()?.is_some())
    }

    /// Read-only handle for components that attach the token to requests.
    pub fn reader(&self) -> TokenReader {
        TokenReader {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore").finish_non_exhaustive()
    }
}

/// Cloneable read-only view of a [`TokenStore`].
#[derive(Clone)]
pub struct TokenReader {
    storage: Arc<dyn SecureStorage>,
}

impl TokenReader {
    /// Read-only view over `storage`, for components wired up before the
    /// [`TokenStore`] that writes to it.
    pub fn from_storage(storage: Arc<dyn SecureStorage>) -> Self {
        Self { storage }
    }

    pub fn get(&self) -> StorageResult<Option<String>> {
        read_token(self.storage.as_ref())
    }
}

impl std::fmt::Debug for TokenReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenReader").finish_non_exhaustive()
    }
}

// Blank values are treated as absent.
fn read_token(storage: &dyn SecureStorage) -> StorageResult<Option<String>> {
    Ok(storage
        .get(StorageKeys::AUTH_TOKEN)?
        .filter(|t| !t.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FileStorage, MemoryStorage};
    use tempfile::TempDir;

    #[test]
    fn set_get_clear() {
        let store = TokenStore::new(Box::new(MemoryStorage::new()));
        assert_eq!(store.get().unwrap(), None);

        store.set("T").unwrap();
        assert_eq!(store.get().unwrap().as_deref(), Some("T"));
        assert!(store.has().unwrap());

        store.clear().unwrap();
        assert_eq!(store.get().unwrap(), None);
        store.clear().unwrap();
    }

    #[test]
    fn reader_built_before_the_store_shares_its_backend() {
        let storage: Arc<dyn SecureStorage> = Arc::new(MemoryStorage::new());
        let reader = TokenReader::from_storage(Arc::clone(&storage));
        let store = TokenStore::from_shared(storage);

        assert_eq!(reader.get().unwrap(), None);
        store.set("abc").unwrap();
        assert_eq!(reader.get().unwrap().as_deref(), Some("abc"));
        store.clear().unwrap();
        assert_eq!(reader.get().unwrap(), None);
    }

    #[test]
    fn reader_sees_writes() {
        let store = TokenStore::new(Box::new(MemoryStorage::new()));
        let reader = store.reader();

        store.set("first").unwrap();
        assert_eq!(reader.get().unwrap().as_deref(), Some("first"));

        store.set("second").unwrap();
        assert_eq!(reader.clone().get().unwrap().as_deref(), Some("second"));

        store.clear().unwrap();
        assert_eq!(reader.get().unwrap(), None);
    }

    #[test]
    fn blank_token_reads_as_absent() {
        let store = TokenStore::new(Box::new(MemoryStorage::with_value(
            StorageKeys::AUTH_TOKEN,
            "  ",
        )));
        assert_eq!(store.get().unwrap(), None);
        assert!(!store.has().unwrap());
    }

    #[test]
    fn token_persists_across_restarts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");

        TokenStore::new(Box::new(FileStorage::new(&path)))
            .set("persisted")
            .unwrap();

        let restarted = TokenStore::new(Box::new(FileStorage::new(&path)));
        assert_eq!(restarted.get().unwrap().as_deref(), Some("persisted"));
    }
}
