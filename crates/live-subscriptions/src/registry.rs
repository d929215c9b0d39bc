//! Subscription registry.
//!
//! Binds live feeds to the authentication session:
//! - while not authenticated no listener exists; requests are remembered and
//!   show an idle state;
//! - once authenticated, listeners attach after a settle delay;
//! - when the session leaves `Authenticated`, every listener is detached
//!   synchronously inside the transition.
//!
//! Handles with the same path and constraints share one listener.

use crate::feed::FeedState;
use crate::query::{Constraint, FeedKey, FeedQuery};
use crate::slot::FeedSlot;
use crate::subscription::{HandleShared, Subscription};
use crate::transport::{FeedSink, LiveFeedTransport};
use parking_lot::Mutex;
use session_auth::{ListenerId, SessionManager, SessionSnapshot};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

enum AuthPhase {
    SignedOut,
    /// Authenticated; waiting for the settle delay before attaching.
    Settling { epoch: u64, task: JoinHandle<()> },
    Ready { epoch: u64 },
}

struct RegistryInner {
    feeds: HashMap<FeedKey, Arc<FeedSlot>>,
    phase: AuthPhase,
}

impl RegistryInner {
    fn is_ready_for(&self, epoch: u64) -> bool {
        matches!(self.phase, AuthPhase::Ready { epoch: current } if current == epoch)
    }
}

pub(crate) struct RegistryShared {
    transport: Arc<dyn LiveFeedTransport>,
    settle_delay: Duration,
    runtime: Handle,
    inner: Mutex<RegistryInner>,
    next_generation: AtomicU64,
    next_handle: AtomicU64,
}

impl RegistryShared {
    fn on_session_change(self: &Arc<Self>, snapshot: &SessionSnapshot) {
        if snapshot.is_authenticated() {
            self.on_authenticated(snapshot.epoch);
        } else {
            self.on_signed_out();
        }
    }

    fn on_authenticated(self: &Arc<Self>, epoch: u64) {
        let slots: Vec<Arc<FeedSlot>> = {
            let mut inner = self.inner.lock();
            match &inner.phase {
                AuthPhase::Settling { epoch: current, .. } | AuthPhase::Ready { epoch: current }
                    if *current == epoch =>
                {
                    return;
                }
                _ => {}
            }

            if let AuthPhase::Settling { task, .. } =
                std::mem::replace(&mut inner.phase, AuthPhase::SignedOut)
            {
                task.abort();
            }

            let weak = Arc::downgrade(self);
            let delay = self.settle_delay;
            let task = self.runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(shared) = weak.upgrade() {
                    shared.settle(epoch);
                }
            });
            inner.phase = AuthPhase::Settling { epoch, task };
            inner.feeds.values().cloned().collect()
        };

        debug!(epoch, feeds = slots.len(), "Session authenticated, feeds will attach after settle delay");
        // A listener left over from a replaced session must not survive.
        for slot in slots {
            slot.reset(FeedState::loading());
        }
    }

    fn on_signed_out(&self) {
        let slots: Vec<Arc<FeedSlot>> = {
            let mut inner = self.inner.lock();
            if let AuthPhase::Settling { task, .. } =
                std::mem::replace(&mut inner.phase, AuthPhase::SignedOut)
            {
                task.abort();
            }
            inner.feeds.values().cloned().collect()
        };

        let attached = slots.iter().filter(|slot| slot.has_listener()).count();
        for slot in &slots {
            slot.reset(FeedState::idle());
        }
        if attached > 0 {
            info!(listeners = attached, "Tore down live feeds after session ended");
        }
    }

    fn settle(&self, epoch: u64) {
        let slots: Vec<Arc<FeedSlot>> = {
            let mut inner = self.inner.lock();
            match inner.phase {
                AuthPhase::Settling { epoch: current, .. } if current == epoch => {}
                _ => return,
            }
            inner.phase = AuthPhase::Ready { epoch };
            inner.feeds.values().cloned().collect()
        };

        for slot in slots {
            self.attach(&slot, epoch);
        }
    }

    /// Attach a listener for `slot` unless one exists already or the session
    /// moved past `epoch`. Never called with the registry lock held:
    /// transports may deliver synchronously, and a consumer reacting to that
    /// delivery may end the session before this returns.
    fn attach(&self, slot: &Arc<FeedSlot>, epoch: u64) {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        {
            let inner = self.inner.lock();
            if !inner.is_ready_for(epoch) {
                debug!(feed = %slot.key, epoch, "Skipping attach for a session that ended");
                return;
            }
            if !slot.begin_attach(generation) {
                return;
            }
        }

        let weak = Arc::downgrade(slot);
        let sink: FeedSink = Arc::new(move |event| {
            if let Some(slot) = weak.upgrade() {
                slot.deliver(generation, event);
            }
        });

        match self.transport.attach(&slot.query, sink) {
            Ok(listener) => {
                let stale = {
                    let inner = self.inner.lock();
                    if inner.is_ready_for(epoch) {
                        slot.finish_attach(generation, listener)
                    } else {
                        Some(listener)
                    }
                };
                if let Some(mut stale) = stale {
                    stale.detach();
                    debug!(feed = %slot.key, generation, "Feed torn down while attaching");
                } else {
                    debug!(feed = %slot.key, generation, "Feed listener attached");
                }
            }
            Err(e) => {
                warn!(feed = %slot.key, error = %e, "Failed to attach feed listener");
                slot.fail_attach(generation, e);
            }
        }
    }

    pub(crate) fn bind(&self, handle: &Arc<HandleShared>, query: FeedQuery) {
        if let Err(e) = query.shape() {
            warn!(path = query.path(), error = %e, "Rejected feed subscription");
            {
                let mut binding = handle.binding.lock();
                binding.query = Some(query);
                binding.slot = None;
            }
            handle.push(&FeedState::failed(e));
            return;
        }

        let (slot, state, attach_epoch) = {
            let mut inner = self.inner.lock();
            let (initial, ready) = match inner.phase {
                AuthPhase::SignedOut => (FeedState::idle(), None),
                AuthPhase::Settling { .. } => (FeedState::loading(), None),
                AuthPhase::Ready { epoch } => (FeedState::loading(), Some(epoch)),
            };
            let slot = Arc::clone(
                inner
                    .feeds
                    .entry(query.key())
                    .or_insert_with(|| Arc::new(FeedSlot::new(query.clone(), initial))),
            );
            let state = slot.add_consumer(handle);
            {
                let mut binding = handle.binding.lock();
                binding.query = Some(query);
                binding.slot = Some(Arc::clone(&slot));
            }
            (slot, state, ready)
        };

        handle.push(&state);
        if let Some(epoch) = attach_epoch {
            self.attach(&slot, epoch);
        }
    }

    pub(crate) fn unbind(&self, handle: &HandleShared) {
        let abandoned = {
            let mut inner = self.inner.lock();
            let Some(slot) = handle.binding.lock().slot.take() else {
                return;
            };
            if slot.remove_consumer(handle.id) {
                inner.feeds.remove(&slot.key);
                Some(slot)
            } else {
                None
            }
        };

        if let Some(slot) = abandoned {
            slot.release();
        }
    }

    fn teardown_all(&self) {
        let slots: Vec<Arc<FeedSlot>> = {
            let mut inner = self.inner.lock();
            if let AuthPhase::Settling { task, .. } =
                std::mem::replace(&mut inner.phase, AuthPhase::SignedOut)
            {
                task.abort();
            }
            inner.feeds.drain().map(|(_, slot)| slot).collect()
        };
        for slot in slots {
            slot.reset(FeedState::idle());
        }
    }
}

/// Registry of live feed subscriptions bound to a session.
pub struct SubscriptionRegistry {
    shared: Arc<RegistryShared>,
    session: Arc<SessionManager>,
    listener: ListenerId,
}

impl SubscriptionRegistry {
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        session: Arc<SessionManager>,
        transport: Arc<dyn LiveFeedTransport>,
        settle_delay: Duration,
    ) -> Self {
        let shared = Arc::new(RegistryShared {
            transport,
            settle_delay,
            runtime: Handle::current(),
            inner: Mutex::new(RegistryInner {
                feeds: HashMap::new(),
                phase: AuthPhase::SignedOut,
            }),
            next_generation: AtomicU64::new(1),
            next_handle: AtomicU64::new(1),
        });

        let weak = Arc::downgrade(&shared);
        let listener = session.add_state_listener(move |snapshot| {
            if let Some(shared) = weak.upgrade() {
                shared.on_session_change(snapshot);
            }
        });
        shared.on_session_change(&session.snapshot());

        Self {
            shared,
            session,
            listener,
        }
    }

    /// Subscribe to `path` filtered by `constraints`.
    ///
    /// Never fails: invalid paths and transport refusals show up in the
    /// handle's `error`.
    pub fn subscribe(&self, path: &str, constraints: Vec<Constraint>) -> Subscription {
        let id = self.shared.next_handle.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(HandleShared::new(id));
        self.shared.bind(&handle, FeedQuery::new(path, constraints));
        Subscription::new(handle, Arc::clone(&self.shared))
    }

    /// Number of distinct logical feeds with at least one consumer.
    pub fn feed_count(&self) -> usize {
        self.shared.inner.lock().feeds.len()
    }

    /// Number of feeds with an attached listener.
    pub fn active_listener_count(&self) -> usize {
        let slots: Vec<Arc<FeedSlot>> = self.shared.inner.lock().feeds.values().cloned().collect();
        slots.iter().filter(|slot| slot.has_listener()).count()
    }

    /// True once the settle delay after authentication has elapsed.
    pub fn is_ready(&self) -> bool {
        matches!(self.shared.inner.lock().phase, AuthPhase::Ready { .. })
    }
}

impl Drop for SubscriptionRegistry {
    fn drop(&mut self) {
        self.session.remove_state_listener(self.listener);
        self.shared.teardown_all();
    }
}

