//! Seam between the registry and whatever delivers live data.

use crate::error::FeedResult;
use crate::feed::FeedEvent;
use crate::query::FeedQuery;
use std::sync::Arc;

/// Callback a transport invokes for every event of one listener.
///
/// Transports must not hold their own locks while calling it.
pub type FeedSink = Arc<dyn Fn(FeedEvent) + Send + Sync>;

/// An attached listener. Detaching stops deliveries; it must be idempotent.
pub trait FeedListener: Send {
    fn detach(&mut self);
}

/// Source of live feeds.
pub trait LiveFeedTransport: Send + Sync {
    /// Start listening to `query`. The transport may deliver the initial
    /// snapshot synchronously from inside this call.
    fn attach(&self, query: &FeedQuery, sink: FeedSink) -> FeedResult<Box<dyn FeedListener>>;
}
