//! Feed payloads and per-subscription state.

use crate::error::FeedError;
use serde::Serialize;
use serde_json::Value;

/// One record of a feed. Always a JSON object in practice.
pub type Record = Value;

/// Current payload of a feed.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FeedData {
    /// Nothing delivered (not attached, or torn down)
    #[default]
    Empty,
    Collection(Vec<Record>),
    /// `None` when the document does not exist
    Document(Option<Record>),
}

impl FeedData {
    pub fn is_empty(&self) -> bool {
        match self {
            FeedData::Empty => true,
            FeedData::Collection(records) => records.is_empty(),
            FeedData::Document(doc) => doc.is_none(),
        }
    }

    pub fn records(&self) -> &[Record] {
        match self {
            FeedData::Collection(records) => records,
            _ => &[],
        }
    }

    pub fn document(&self) -> Option<&Record> {
        match self {
            FeedData::Document(doc) => doc.as_ref(),
            _ => None,
        }
    }
}

/// What a consumer sees: `{data, loading, error}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FeedState {
    pub data: FeedData,
    pub loading: bool,
    pub error: Option<FeedError>,
}

impl FeedState {
    /// Terminal state with no listener.
    pub fn idle() -> Self {
        Self::default()
    }

    /// Waiting for the first delivery.
    pub fn loading() -> Self {
        Self {
            loading: true,
            ..Self::default()
        }
    }

    pub fn failed(error: FeedError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

/// Event a transport pushes into a listener's sink.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Full replacement of the feed payload
    Snapshot(FeedData),
    /// Delivery failure; the listener stays attached
    Error(FeedError),
    /// The transport ended the feed
    Closed,
}
