//! Transport error types.

use thiserror::Error;

/// Errors produced by a [`Transport`](crate::Transport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection, DNS or other I/O failure before a response arrived
    #[error("Network error: {0}")]
    Network(String),

    /// The configured request deadline elapsed
    #[error("Request timed out")]
    Timeout,

    /// Server answered with a non-success status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Response body was not valid JSON
    #[error("Decode error: {0}")]
    Decode(String),

    /// The request could not be built (bad path or base URL)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Whether retrying the same request later might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Network(_) | TransportError::Timeout => true,
            TransportError::Http { status, .. } => *status >= 500 || *status == 429,
            TransportError::Decode(_) | TransportError::InvalidRequest(_) => false,
        }
    }

    /// HTTP status, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 401/403 responses.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else if err.is_builder() {
            TransportError::InvalidRequest(err.to_string())
        } else if let Some(status) = err.status() {
            TransportError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// Result type alias using TransportError.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(TransportError::Network("refused".into()).is_transient());
        assert!(TransportError::Timeout.is_transient());
        assert!(TransportError::Http {
            status: 503,
            message: "unavailable".into()
        }
        .is_transient());
        assert!(TransportError::Http {
            status: 429,
            message: "slow down".into()
        }
        .is_transient());
        assert!(!TransportError::Http {
            status: 401,
            message: "nope".into()
        }
        .is_transient());
        assert!(!TransportError::Decode("eof".into()).is_transient());
    }

    #[test]
    fn unauthorized_only_for_401_and_403() {
        let err = |status| TransportError::Http {
            status,
            message: String::new(),
        };
        assert!(err(401).is_unauthorized());
        assert!(err(403).is_unauthorized());
        assert!(!err(404).is_unauthorized());
        assert!(!TransportError::Timeout.is_unauthorized());
    }
}
