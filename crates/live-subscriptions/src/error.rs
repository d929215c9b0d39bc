//! Feed error types.

use serde::Serialize;
use thiserror::Error;

/// Errors surfaced through a subscription's `error` field.
///
/// None of these are ever returned from `subscribe`; setup and delivery
/// failures land in the feed state.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum FeedError {
    /// Path is empty or has empty segments
    #[error("Invalid feed path: {0}")]
    InvalidPath(String),

    /// Constraint set cannot be evaluated for this path
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Delivery or fetch failure; the listener stays attached
    #[error("Feed transport error: {0}")]
    Transport(String),

    /// The backend refused access to the feed
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The transport closed the feed; no further updates will arrive
    #[error("Feed closed")]
    Closed,
}

/// Result type alias using FeedError.
pub type FeedResult<T> = Result<T, FeedError>;
