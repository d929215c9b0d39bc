//! Dashboard aggregator.
//!
//! Fetches every source concurrently, waits for all of them and swaps in the
//! combined snapshot. Three things trigger a refresh besides explicit calls:
//! a new authenticated session, a debounced mutation notice and the polling
//! loop. Results are applied only if no newer refresh was applied first and
//! the session they were fetched for is still current.

use crate::snapshot::{DashboardSnapshot, DegradationPolicy, RefreshReason, SourceValue};
use crate::source::{default_sources, DashboardSource};
use api_transport::{RequestOptions, Transport};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use session_auth::{ListenerId, SessionManager, SessionSnapshot};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the aggregator's sources and timers.
///
/// # Fields
///
/// - `sources`: sections fetched on every refresh (default: the inventory
///   dashboard table)
/// - `mutation_settle_delay`: quiet period after the last mutation notice
///   before the follow-up refresh (default: 500ms)
/// - `poll_interval`: time between background refreshes (default: 30s)
/// - `degradation_policy`: when a refresh marks the connection as degraded
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub sources: Vec<DashboardSource>,
    pub mutation_settle_delay: Duration,
    pub poll_interval: Duration,
    pub degradation_policy: DegradationPolicy,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            mutation_settle_delay: Duration::from_millis(500),
            poll_interval: Duration::from_secs(30),
            degradation_policy: DegradationPolicy::default(),
        }
    }
}

#[derive(Default)]
struct Debounce {
    deadline: Option<Instant>,
    /// Mutation notices folded into the pending follow-up.
    calls: u64,
    /// Set only while the worker is waiting for the deadline.
    task: Option<JoinHandle<()>>,
}

impl Debounce {
    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.deadline = None;
        self.calls = 0;
    }
}

#[derive(Default)]
struct State {
    applied_sequence: u64,
    /// Epoch of the session the last `SessionStarted` refresh was issued for.
    started_epoch: Option<u64>,
    debounce: Debounce,
    poll_task: Option<JoinHandle<()>>,
    /// Set by a degraded snapshot; cleared by a healthy manual or
    /// session-start refresh, or by a session transition.
    poll_suspended: bool,
}

struct Shared {
    config: AggregatorConfig,
    transport: Arc<dyn Transport>,
    session: Arc<SessionManager>,
    runtime: Handle,
    state: Mutex<State>,
    next_sequence: AtomicU64,
    updating: AtomicUsize,
    snapshot_tx: watch::Sender<DashboardSnapshot>,
}

struct UpdatingGuard<'a>(&'a AtomicUsize);

impl<'a> UpdatingGuard<'a> {
    fn raise(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for UpdatingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Shared {
    async fn refresh(&self, reason: RefreshReason) -> Option<DashboardSnapshot> {
        let session = self.session.snapshot();
        let token = match self.session.bearer_token() {
            Some(token) if session.is_authenticated() => token,
            _ => {
                debug!(reason = reason.as_str(), "Skipping dashboard refresh, not authenticated");
                return None;
            }
        };

        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let _updating = reason
            .raises_updating()
            .then(|| UpdatingGuard::raise(&self.updating));
        debug!(reason = reason.as_str(), sequence, "Refreshing dashboard");

        let fetches = self.config.sources.iter().map(|source| {
            let options = RequestOptions::bearer(token.clone());
            async move {
                let value = match self.transport.get(&source.path(), options).await {
                    Ok(value) => SourceValue::Fetched { value },
                    Err(e) => {
                        debug!(source = %source.name, error = %e, "Dashboard source failed");
                        SourceValue::Defaulted {
                            value: source.default.clone(),
                            error: e.to_string(),
                        }
                    }
                };
                (source.name.clone(), value)
            }
        });
        let sources: BTreeMap<String, SourceValue> = join_all(fetches).await.into_iter().collect();

        self.apply(sequence, session.epoch, reason, sources)
    }

    fn apply(
        &self,
        sequence: u64,
        epoch: u64,
        reason: RefreshReason,
        sources: BTreeMap<String, SourceValue>,
    ) -> Option<DashboardSnapshot> {
        let total = sources.len();
        let failed = sources.values().filter(|value| value.is_defaulted()).count();

        let snapshot = {
            let mut state = self.state.lock();
            if sequence <= state.applied_sequence {
                debug!(sequence, applied = state.applied_sequence, "Discarding superseded dashboard refresh");
                return None;
            }
            let current = self.session.snapshot();
            if !current.is_authenticated() || current.epoch != epoch {
                debug!(sequence, "Discarding dashboard refresh from a previous session");
                return None;
            }

            let snapshot = DashboardSnapshot {
                sources,
                last_update: Some(Utc::now()),
                connection_degraded: self.config.degradation_policy.is_degraded(failed, total),
                sequence,
            };
            state.applied_sequence = sequence;
            if snapshot.connection_degraded {
                state.poll_suspended = true;
            } else if reason.resumes_polling() && state.poll_suspended {
                state.poll_suspended = false;
                info!(reason = reason.as_str(), "Dashboard polling resumed");
            }
            self.snapshot_tx.send_replace(snapshot.clone());
            snapshot
        };

        if snapshot.connection_degraded {
            warn!(failed, total, "Dashboard connection degraded");
        } else if let Some(partial) = snapshot.partial_failure() {
            warn!(failed = ?partial.failed, "{partial}");
        }
        debug!(reason = reason.as_str(), sequence, "Dashboard snapshot applied");
        Some(snapshot)
    }

    fn on_session_change(self: &Arc<Self>, snapshot: &SessionSnapshot) {
        if snapshot.is_authenticated() {
            {
                let mut state = self.state.lock();
                if state.started_epoch == Some(snapshot.epoch) {
                    return;
                }
                state.started_epoch = Some(snapshot.epoch);
                state.poll_suspended = false;
            }
            info!(epoch = snapshot.epoch, "Session started, refreshing dashboard");
            let weak = Arc::downgrade(self);
            self.runtime.spawn(async move {
                if let Some(shared) = weak.upgrade() {
                    shared.refresh(RefreshReason::SessionStarted).await;
                }
            });
        } else {
            let had_data = {
                let mut state = self.state.lock();
                state.started_epoch = None;
                state.poll_suspended = false;
                state.debounce.cancel();
                let had_data = !self.snapshot_tx.borrow().is_empty();
                self.snapshot_tx.send_replace(DashboardSnapshot::default());
                had_data
            };
            if had_data {
                info!("Cleared dashboard after session ended");
            }
        }
    }

    fn schedule_follow_up(self: &Arc<Self>, change_kind: &str, payload: &Value) {
        let mut state = self.state.lock();
        state.debounce.deadline = Some(Instant::now() + self.config.mutation_settle_delay);
        state.debounce.calls += 1;
        debug!(
            change_kind,
            payload = %payload,
            pending = state.debounce.calls,
            "Mutation noted, dashboard refresh debounced"
        );
        if state.debounce.task.is_none() {
            let weak = Arc::downgrade(self);
            state.debounce.task = Some(self.runtime.spawn(run_follow_up(weak)));
        }
    }
}

/// Wait until no mutation notice arrived for the settle delay, then refresh
/// once.
async fn run_follow_up(weak: Weak<Shared>) {
    loop {
        let deadline = {
            let Some(shared) = weak.upgrade() else { return };
            let deadline = shared.state.lock().debounce.deadline;
            match deadline {
                Some(deadline) => deadline,
                None => return,
            }
        };
        tokio::time::sleep_until(deadline).await;

        let Some(shared) = weak.upgrade() else { return };
        let calls = {
            let mut state = shared.state.lock();
            match state.debounce.deadline {
                Some(deadline) if deadline <= Instant::now() => {
                    state.debounce.deadline = None;
                    state.debounce.task = None;
                    std::mem::take(&mut state.debounce.calls)
                }
                Some(_) => continue,
                None => {
                    state.debounce.task = None;
                    return;
                }
            }
        };
        debug!(calls, "Running debounced dashboard refresh");
        shared.refresh(RefreshReason::MutationFollowUp).await;
        return;
    }
}

/// Multi-source dashboard bound to a session.
pub struct DashboardAggregator {
    shared: Arc<Shared>,
    listener: ListenerId,
}

impl DashboardAggregator {
    /// Create the aggregator and start observing `session`. If the session is
    /// already authenticated a `SessionStarted` refresh is issued right away.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        session: Arc<SessionManager>,
        transport: Arc<dyn Transport>,
        config: AggregatorConfig,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(DashboardSnapshot::default());
        let shared = Arc::new(Shared {
            config,
            transport,
            session: Arc::clone(&session),
            runtime: Handle::current(),
            state: Mutex::new(State::default()),
            next_sequence: AtomicU64::new(1),
            updating: AtomicUsize::new(0),
            snapshot_tx,
        });

        let weak = Arc::downgrade(&shared);
        let listener = session.add_state_listener(move |snapshot| {
            if let Some(shared) = weak.upgrade() {
                shared.on_session_change(snapshot);
            }
        });
        shared.on_session_change(&session.snapshot());

        Self { shared, listener }
    }

    /// Fetch all sources and apply the result.
    ///
    /// Returns `None` when not authenticated or when the result was
    /// superseded by a newer refresh or a session change.
    pub async fn refresh(&self, reason: RefreshReason) -> Option<DashboardSnapshot> {
        self.shared.refresh(reason).await
    }

    /// Record a data mutation. One `MutationFollowUp` refresh runs once no
    /// further notice arrived for the settle delay.
    pub fn notify_mutation(&self, change_kind: &str, payload: Value) {
        self.shared.schedule_follow_up(change_kind, &payload);
    }

    /// Start the polling loop. Calling it again has no effect.
    ///
    /// Each tick refreshes while authenticated. After a degraded snapshot,
    /// ticks are skipped until a healthy manual refresh or a new session.
    pub fn start(&self) {
        let mut state = self.shared.state.lock();
        if state.poll_task.is_some() {
            return;
        }

        let weak = Arc::downgrade(&self.shared);
        let period = self.shared.config.poll_interval;
        state.poll_task = Some(self.shared.runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else { break };
                if !shared.session.is_authenticated() {
                    continue;
                }
                if shared.state.lock().poll_suspended {
                    debug!("Dashboard polling suspended after degradation, poll skipped");
                    continue;
                }
                shared.refresh(RefreshReason::Poll).await;
            }
        }));
        info!(interval_secs = period.as_secs(), "Dashboard polling started");
    }

    pub fn stop(&self) {
        if let Some(task) = self.shared.state.lock().poll_task.take() {
            task.abort();
            info!("Dashboard polling stopped");
        }
    }

    pub fn is_polling(&self) -> bool {
        self.shared.state.lock().poll_task.is_some()
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        self.shared.snapshot_tx.borrow().clone()
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<DashboardSnapshot> {
        self.shared.snapshot_tx.subscribe()
    }

    /// True while a `Manual` or `SessionStarted` refresh is in flight.
    pub fn is_updating(&self) -> bool {
        self.shared.updating.load(Ordering::SeqCst) > 0
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.shared.snapshot_tx.borrow().last_update
    }

    pub fn connection_degraded(&self) -> bool {
        self.shared.snapshot_tx.borrow().connection_degraded
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.shared.config
    }
}

impl Drop for DashboardAggregator {
    fn drop(&mut self) {
        self.shared.session.remove_state_listener(self.listener);
        let mut state = self.shared.state.lock();
        state.debounce.cancel();
        if let Some(task) = state.poll_task.take() {
            task.abort();
        }
    }
}
