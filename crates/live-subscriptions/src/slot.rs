//! One logical feed shared by every handle with the same query key.

use crate::error::FeedError;
use crate::feed::{FeedEvent, FeedState};
use crate::query::{FeedKey, FeedQuery};
use crate::subscription::HandleShared;
use crate::transport::FeedListener;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::debug;

pub(crate) struct FeedSlot {
    pub(crate) key: FeedKey,
    pub(crate) query: FeedQuery,
    inner: Mutex<SlotInner>,
}

struct SlotInner {
    state: FeedState,
    /// Generation of the current listener; 0 when none is attached.
    generation: u64,
    listener: Option<Box<dyn FeedListener>>,
    consumers: Vec<(u64, Weak<HandleShared>)>,
}

impl SlotInner {
    fn live_consumers(&self) -> Vec<Arc<HandleShared>> {
        self.consumers
            .iter()
            .filter_map(|(_, handle)| handle.upgrade())
            .collect()
    }
}

impl FeedSlot {
    pub(crate) fn new(query: FeedQuery, state: FeedState) -> Self {
        Self {
            key: query.key(),
            query,
            inner: Mutex::new(SlotInner {
                state,
                generation: 0,
                listener: None,
                consumers: Vec::new(),
            }),
        }
    }

    /// Register a consumer and return the state it should show.
    pub(crate) fn add_consumer(&self, handle: &Arc<HandleShared>) -> FeedState {
        let mut inner = self.inner.lock();
        inner.consumers.push((handle.id, Arc::downgrade(handle)));
        inner.state.clone()
    }

    /// Returns true when no consumer is left.
    pub(crate) fn remove_consumer(&self, handle_id: u64) -> bool {
        let mut inner = self.inner.lock();
        inner
            .consumers
            .retain(|(id, handle)| *id != handle_id && handle.strong_count() > 0);
        inner.consumers.is_empty()
    }

    pub(crate) fn has_listener(&self) -> bool {
        self.inner.lock().listener.is_some()
    }

    /// Claim the slot for a new listener generation. Fails when a listener is
    /// already attached (or being attached) or nobody consumes the feed.
    pub(crate) fn begin_attach(&self, generation: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != 0 || inner.consumers.is_empty() {
            return false;
        }
        inner.generation = generation;
        true
    }

    /// Store the listener returned by the transport. Hands it back when the
    /// slot was torn down while attaching.
    pub(crate) fn finish_attach(
        &self,
        generation: u64,
        listener: Box<dyn FeedListener>,
    ) -> Option<Box<dyn FeedListener>> {
        let mut inner = self.inner.lock();
        if inner.generation == generation {
            inner.listener = Some(listener);
            None
        } else {
            Some(listener)
        }
    }

    pub(crate) fn fail_attach(&self, generation: u64, error: FeedError) {
        let (consumers, state) = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return;
            }
            inner.generation = 0;
            inner.state = FeedState {
                data: inner.state.data.clone(),
                loading: false,
                error: Some(error),
            };
            (inner.live_consumers(), inner.state.clone())
        };
        push_all(&consumers, &state);
    }

    /// Apply a transport event if it belongs to the current listener.
    pub(crate) fn deliver(&self, generation: u64, event: FeedEvent) {
        let (consumers, state, closed) = {
            let mut inner = self.inner.lock();
            if generation == 0 || inner.generation != generation {
                debug!(feed = %self.key, generation, "Discarding stale feed delivery");
                return;
            }

            let mut closed = None;
            match event {
                FeedEvent::Snapshot(data) => {
                    inner.state = FeedState {
                        data,
                        loading: false,
                        error: None,
                    };
                }
                FeedEvent::Error(error) => {
                    inner.state.loading = false;
                    inner.state.error = Some(error);
                }
                FeedEvent::Closed => {
                    inner.state.loading = false;
                    inner.state.error = Some(FeedError::Closed);
                    inner.generation = 0;
                    closed = inner.listener.take();
                }
            }
            (inner.live_consumers(), inner.state.clone(), closed)
        };

        if let Some(mut listener) = closed {
            listener.detach();
            debug!(feed = %self.key, "Feed closed by transport");
        }
        push_all(&consumers, &state);
    }

    /// Drop the listener (if any), invalidate its generation and publish
    /// `state` to every consumer.
    pub(crate) fn reset(&self, state: FeedState) {
        let (consumers, listener) = {
            let mut inner = self.inner.lock();
            inner.generation = 0;
            inner.state = state.clone();
            (inner.live_consumers(), inner.listener.take())
        };
        if let Some(mut listener) = listener {
            listener.detach();
            debug!(feed = %self.key, "Feed listener detached");
        }
        push_all(&consumers, &state);
    }

    /// Drop the listener without publishing anything.
    pub(crate) fn release(&self) {
        let listener = {
            let mut inner = self.inner.lock();
            inner.generation = 0;
            inner.listener.take()
        };
        if let Some(mut listener) = listener {
            listener.detach();
            debug!(feed = %self.key, "Feed listener detached");
        }
    }
}

fn push_all(consumers: &[Arc<HandleShared>], state: &FeedState) {
    for consumer in consumers {
        consumer.push(state);
    }
}
