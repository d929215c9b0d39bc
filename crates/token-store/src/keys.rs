//! Storage key constants.

/// Storage keys used by the session core
pub struct StorageKeys;

impl StorageKeys {
    /// Current bearer token. The only key the core persists.
    pub const AUTH_TOKEN: &'static str = "auth_token";
}
