//! Session error types.

use api_transport::TransportError;
use serde::Serialize;
use thiserror::Error;
use token_store::StorageError;

use crate::claims::ClaimsError;

/// Session operation error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Missing or blank input; never reaches the network
    #[error("Validation error: {0}")]
    Validation(String),

    /// Connection failure before a response arrived
    #[error("Network error: {0}")]
    Network(String),

    /// Transport deadline elapsed
    #[error("Request timed out")]
    Timeout,

    /// Server answered with a non-success status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Success status but required fields are missing
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Stored token expired locally
    #[error("Token expired")]
    TokenExpired,

    /// Token undecodable or rejected by the server
    #[error("Token invalid: {0}")]
    TokenInvalid(String),

    /// The session changed while the request was in flight; the result was
    /// discarded
    #[error("Superseded by a newer session change")]
    Superseded,

    /// Token storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Anything not covered above
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Flat error classification for callers and UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorKind {
    Validation,
    Network,
    Timeout,
    Http,
    MalformedResponse,
    TokenExpired,
    TokenInvalid,
    Superseded,
    Storage,
    Unexpected,
}

impl AuthError {
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            AuthError::Validation(_) => AuthErrorKind::Validation,
            AuthError::Network(_) => AuthErrorKind::Network,
            AuthError::Timeout => AuthErrorKind::Timeout,
            AuthError::Http { .. } => AuthErrorKind::Http,
            AuthError::MalformedResponse(_) => AuthErrorKind::MalformedResponse,
            AuthError::TokenExpired => AuthErrorKind::TokenExpired,
            AuthError::TokenInvalid(_) => AuthErrorKind::TokenInvalid,
            AuthError::Superseded => AuthErrorKind::Superseded,
            AuthError::Storage(_) => AuthErrorKind::Storage,
            AuthError::Unexpected(_) => AuthErrorKind::Unexpected,
        }
    }

    /// Returns true if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Network(_) | AuthError::Timeout => true,
            AuthError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<TransportError> for AuthError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Network(msg) => AuthError::Network(msg),
            TransportError::Timeout => AuthError::Timeout,
            TransportError::Http { status, message } => AuthError::Http { status, message },
            TransportError::Decode(msg) => AuthError::MalformedResponse(msg),
            TransportError::InvalidRequest(msg) => AuthError::Unexpected(msg),
        }
    }
}

impl From<ClaimsError> for AuthError {
    fn from(err: ClaimsError) -> Self {
        AuthError::TokenInvalid(err.to_string())
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_keep_their_kind() {
        assert_eq!(
            AuthError::from(TransportError::Network("refused".into())).kind(),
            AuthErrorKind::Network
        );
        assert_eq!(
            AuthError::from(TransportError::Timeout).kind(),
            AuthErrorKind::Timeout
        );
        assert_eq!(
            AuthError::from(TransportError::Decode("eof".into())).kind(),
            AuthErrorKind::MalformedResponse
        );
        assert_eq!(
            AuthError::from(TransportError::Http {
                status: 401,
                message: "no".into()
            })
            .kind(),
            AuthErrorKind::Http
        );
    }

    #[test]
    fn test_is_transient() {
        assert!(AuthError::Timeout.is_transient());
        assert!(AuthError::Network("down".into()).is_transient());
        assert!(AuthError::Http {
            status: 502,
            message: String::new()
        }
        .is_transient());
        assert!(!AuthError::Validation("empty".into()).is_transient());
        assert!(!AuthError::TokenExpired.is_transient());
        assert!(!AuthError::Superseded.is_transient());
    }

    #[test]
    fn test_claims_error_is_token_invalid() {
        let err = AuthError::from(ClaimsError::ClaimType("exp"));
        assert_eq!(err.kind(), AuthErrorKind::TokenInvalid);
    }
}
