//! Request/response contract between the session core and the backend.
//!
//! Everything above this crate talks to the server through [`Transport`].
//! [`HttpTransport`] is the production implementation; [`mock::MockTransport`]
//! (feature `mock`) scripts responses for tests.

mod error;
mod http;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::{TransportError, TransportResult};
pub use http::HttpTransport;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

/// HTTP method subset used by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request options.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Explicit bearer token. When `None`, implementations may fall back to
    /// a stored token.
    pub bearer_token: Option<String>,
}

impl RequestOptions {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            bearer_token: Some(token.into()),
        }
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

/// JSON request/response transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request relative to the configured base URL.
    ///
    /// A successful response with an empty body yields `Value::Null`.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> TransportResult<Value>;

    async fn get(&self, path: &str, options: RequestOptions) -> TransportResult<Value> {
        self.request(Method::Get, path, None, options).await
    }

    async fn post(
        &self,
        path: &str,
        body: Value,
        options: RequestOptions,
    ) -> TransportResult<Value> {
        self.request(Method::Post, path, Some(body), options).await
    }
}
