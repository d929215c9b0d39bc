//! Consumer-facing subscription handle.

use crate::feed::FeedState;
use crate::query::{Constraint, FeedQuery};
use crate::registry::RegistryShared;
use crate::slot::FeedSlot;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

type UpdateCallback = Arc<dyn Fn(&FeedState) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Binding {
    pub(crate) query: Option<FeedQuery>,
    pub(crate) slot: Option<Arc<FeedSlot>>,
    pub(crate) closed: bool,
}

/// State shared between a [`Subscription`] and the slot feeding it.
pub(crate) struct HandleShared {
    pub(crate) id: u64,
    tx: watch::Sender<FeedState>,
    callbacks: Mutex<Vec<UpdateCallback>>,
    pub(crate) binding: Mutex<Binding>,
}

impl HandleShared {
    pub(crate) fn new(id: u64) -> Self {
        let (tx, _) = watch::channel(FeedState::idle());
        Self {
            id,
            tx,
            callbacks: Mutex::new(Vec::new()),
            binding: Mutex::new(Binding::default()),
        }
    }

    /// Publish a new state. Callbacks run without any lock held.
    pub(crate) fn push(&self, state: &FeedState) {
        self.tx.send_replace(state.clone());
        let callbacks: Vec<UpdateCallback> = self.callbacks.lock().clone();
        for callback in callbacks {
            callback(state);
        }
    }
}

/// Live view of one feed: `{data, loading, error}`.
///
/// Dropping the handle closes it.
pub struct Subscription {
    handle: Arc<HandleShared>,
    registry: Arc<RegistryShared>,
}

impl Subscription {
    pub(crate) fn new(handle: Arc<HandleShared>, registry: Arc<RegistryShared>) -> Self {
        Self { handle, registry }
    }

    pub fn state(&self) -> FeedState {
        self.handle.tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<FeedState> {
        self.handle.tx.subscribe()
    }

    /// Invoke `callback` on every state change of this handle.
    pub fn on_update<F>(&self, callback: F)
    where
        F: Fn(&FeedState) + Send + Sync + 'static,
    {
        self.handle.callbacks.lock().push(Arc::new(callback));
    }

    pub fn query(&self) -> Option<FeedQuery> {
        self.handle.binding.lock().query.clone()
    }

    /// Point the handle at another feed. The previous listener is torn down
    /// (if this was its last consumer) before the new one is attached.
    pub fn set_query(&self, path: &str, constraints: Vec<Constraint>) {
        let query = FeedQuery::new(path, constraints);
        {
            let binding = self.handle.binding.lock();
            if binding.closed {
                debug!(path = query.path(), "Ignoring set_query on a closed subscription");
                return;
            }
            if binding.query.as_ref().map(FeedQuery::key) == Some(query.key()) {
                return;
            }
        }
        self.registry.unbind(&self.handle);
        self.registry.bind(&self.handle, query);
    }

    /// Stop receiving updates. Idempotent.
    pub fn close(&self) {
        {
            let mut binding = self.handle.binding.lock();
            if binding.closed {
                return;
            }
            binding.closed = true;
        }
        self.registry.unbind(&self.handle);
        self.handle.callbacks.lock().clear();
        self.handle.tx.send_replace(FeedState::idle());
    }

    pub fn is_closed(&self) -> bool {
        self.handle.binding.lock().closed
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.handle.id)
            .field("query", &self.query())
            .finish()
    }
}
