//! Live data feeds bound to the authentication session.
//!
//! A [`SubscriptionRegistry`] hands out [`Subscription`] handles for a
//! collection or document path plus optional constraints. Listeners only
//! exist while the session is authenticated:
//!
//! - requests made while signed out are remembered and show an idle state;
//! - after authentication the registry waits a short settle delay, then
//!   attaches one listener per distinct feed;
//! - leaving `Authenticated` detaches every listener before the transition
//!   returns.
//!
//! The feed backend is pluggable through [`LiveFeedTransport`].
//! [`MemoryFeedHub`] serves feeds from an in-process store and
//! [`PollingFeedTransport`] emulates them over the REST API.

mod error;
mod feed;
mod hub;
mod polling;
mod query;
mod registry;
mod slot;
mod subscription;
mod transport;

pub use error::{FeedError, FeedResult};
pub use feed::{FeedData, FeedEvent, FeedState, Record};
pub use hub::MemoryFeedHub;
pub use polling::PollingFeedTransport;
pub use query::{Constraint, FeedKey, FeedQuery, FeedShape, FilterOp, SortDirection};
pub use registry::SubscriptionRegistry;
pub use subscription::Subscription;
pub use transport::{FeedListener, FeedSink, LiveFeedTransport};
