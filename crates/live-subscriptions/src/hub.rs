//! In-process live feed transport.
//!
//! Documents are stored per collection path. Every write is pushed to the
//! listeners whose query covers the written document, as a full snapshot of
//! their feed. Sinks are always invoked after the hub's locks are released.

use crate::error::{FeedError, FeedResult};
use crate::feed::{FeedData, FeedEvent, Record};
use crate::query::{FeedQuery, FeedShape};
use crate::transport::{FeedListener, FeedSink, LiveFeedTransport};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

struct HubListener {
    query: FeedQuery,
    sink: FeedSink,
}

#[derive(Default)]
struct HubInner {
    collections: RwLock<HashMap<String, BTreeMap<String, Record>>>,
    listeners: RwLock<HashMap<u64, HubListener>>,
    denied: RwLock<HashSet<String>>,
    next_id: AtomicU64,
    attach_count: AtomicU64,
}

impl HubInner {
    fn snapshot_for(&self, query: &FeedQuery) -> FeedData {
        let collections = self.collections.read();
        match query.document_parts() {
            Some((collection, id)) => FeedData::Document(
                collections
                    .get(collection)
                    .and_then(|docs| docs.get(id))
                    .cloned(),
            ),
            None => {
                let records = collections
                    .get(query.path())
                    .map(|docs| docs.values().cloned().collect())
                    .unwrap_or_default();
                FeedData::Collection(query.apply(records))
            }
        }
    }

    fn detach(&self, id: u64) {
        if self.listeners.write().remove(&id).is_some() {
            debug!(listener_id = id, "Hub listener detached");
        }
    }
}

/// In-memory publish/subscribe feed source.
#[derive(Clone, Default)]
pub struct MemoryFeedHub {
    inner: Arc<HubInner>,
}

impl MemoryFeedHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document and notify affected listeners.
    pub fn set_document(&self, collection: &str, id: &str, record: Record) {
        let collection = collection.trim_matches('/').to_string();
        self.inner
            .collections
            .write()
            .entry(collection.clone())
            .or_default()
            .insert(id.to_string(), record);
        self.notify_write(&collection, id);
    }

    /// Remove a document and notify affected listeners.
    pub fn delete_document(&self, collection: &str, id: &str) {
        let collection = collection.trim_matches('/').to_string();
        let removed = self
            .inner
            .collections
            .write()
            .get_mut(&collection)
            .and_then(|docs| docs.remove(id))
            .is_some();
        if removed {
            self.notify_write(&collection, id);
        }
    }

    /// Push a delivery error to every listener on `path`.
    pub fn fail(&self, path: &str, error: FeedError) {
        let path = path.trim_matches('/');
        let sinks = self.sinks_where(|query| query.path() == path);
        for (_, sink) in sinks {
            sink(FeedEvent::Error(error.clone()));
        }
    }

    /// End every feed on `path`: listeners get `Closed` and are dropped.
    pub fn close(&self, path: &str) {
        let path = path.trim_matches('/');
        let closed = self.sinks_where(|query| query.path() == path);
        {
            let mut listeners = self.inner.listeners.write();
            for (id, _) in &closed {
                listeners.remove(id);
            }
        }
        for (_, sink) in closed {
            sink(FeedEvent::Closed);
        }
    }

    /// Refuse future attaches to `path`.
    pub fn deny(&self, path: &str) {
        self.inner
            .denied
            .write()
            .insert(path.trim_matches('/').to_string());
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    pub fn listener_count_for(&self, path: &str) -> usize {
        let path = path.trim_matches('/');
        self.inner
            .listeners
            .read()
            .values()
            .filter(|l| l.query.path() == path)
            .count()
    }

    /// Total successful attaches since creation.
    pub fn attach_count(&self) -> u64 {
        self.inner.attach_count.load(Ordering::SeqCst)
    }

    fn sinks_where(&self, predicate: impl Fn(&FeedQuery) -> bool) -> Vec<(u64, FeedSink)> {
        self.inner
            .listeners
            .read()
            .iter()
            .filter(|(_, l)| predicate(&l.query))
            .map(|(id, l)| (*id, Arc::clone(&l.sink)))
            .collect()
    }

    fn notify_write(&self, collection: &str, id: &str) {
        let document_path = format!("{collection}/{id}");
        let targets: Vec<(FeedQuery, FeedSink)> = self
            .inner
            .listeners
            .read()
            .values()
            .filter(|l| l.query.path() == collection || l.query.path() == document_path)
            .map(|l| (l.query.clone(), Arc::clone(&l.sink)))
            .collect();

        for (query, sink) in targets {
            let data = self.inner.snapshot_for(&query);
            sink(FeedEvent::Snapshot(data));
        }
    }
}

struct HubHandle {
    id: u64,
    hub: Weak<HubInner>,
}

impl FeedListener for HubHandle {
    fn detach(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.detach(self.id);
        }
    }
}

impl LiveFeedTransport for MemoryFeedHub {
    fn attach(&self, query: &FeedQuery, sink: FeedSink) -> FeedResult<Box<dyn FeedListener>> {
        let shape = query.shape()?;
        let denied = {
            let denied = self.inner.denied.read();
            let collection = match shape {
                FeedShape::Document => query.document_parts().map(|(c, _)| c),
                FeedShape::Collection => Some(query.path()),
            };
            denied.contains(query.path()) || collection.is_some_and(|c| denied.contains(c))
        };
        if denied {
            return Err(FeedError::PermissionDenied(query.path().to_string()));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.listeners.write().insert(
            id,
            HubListener {
                query: query.clone(),
                sink: Arc::clone(&sink),
            },
        );
        self.inner.attach_count.fetch_add(1, Ordering::SeqCst);
        debug!(listener_id = id, path = query.path(), "Hub listener attached");

        let initial = self.inner.snapshot_for(query);
        sink(FeedEvent::Snapshot(initial));

        Ok(Box::new(HubHandle {
            id,
            hub: Arc::downgrade(&self.inner),
        }))
    }
}
