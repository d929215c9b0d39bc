use api_transport::mock::MockTransport;
use api_transport::{Method, Transport};
use live_subscriptions::{
    Constraint, FeedData, FeedError, FeedEvent, FeedListener, FeedQuery, FeedResult, FeedSink,
    FeedState, FilterOp, LiveFeedTransport, MemoryFeedHub, SubscriptionRegistry,
};
use parking_lot::Mutex;
use serde_json::json;
use session_auth::{SessionManager, SessionStatus};
use std::sync::Arc;
use std::time::Duration;
use token_store::{MemoryStorage, TokenStore};

const SETTLE: Duration = Duration::from_millis(100);

struct Harness {
    session: Arc<SessionManager>,
    api: Arc<MockTransport>,
}

impl Harness {
    fn new() -> Self {
        let api = Arc::new(MockTransport::new());
        api.on(
            Method::Post,
            "/login",
            Ok(json!({"token": "tok-1", "user": {"id": 7, "name": "Ana"}})),
        )
        .on(
            Method::Post,
            "/verify-token",
            Ok(json!({"valid": true, "user": {"id": 7, "name": "Ana"}})),
        );
        let session = SessionManager::new(
            TokenStore::new(Box::new(MemoryStorage::new())),
            api.clone() as Arc<dyn Transport>,
        );
        Self {
            session: Arc::new(session),
            api,
        }
    }

    async fn login(&self) {
        self.session.login("ana@example.com", "pw").await.unwrap();
    }

    fn registry(&self, feeds: Arc<dyn LiveFeedTransport>) -> SubscriptionRegistry {
        SubscriptionRegistry::new(self.session.clone(), feeds, SETTLE)
    }
}

async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Wraps a hub and records attach/detach order per path.
struct Recording {
    hub: MemoryFeedHub,
    log: Arc<Mutex<Vec<String>>>,
}

struct RecordingListener {
    path: String,
    inner: Box<dyn FeedListener>,
    log: Arc<Mutex<Vec<String>>>,
    detached: bool,
}

impl FeedListener for RecordingListener {
    fn detach(&mut self) {
        if !self.detached {
            self.detached = true;
            self.log.lock().push(format!("detach {}", self.path));
        }
        self.inner.detach();
    }
}

impl LiveFeedTransport for Recording {
    fn attach(&self, query: &FeedQuery, sink: FeedSink) -> FeedResult<Box<dyn FeedListener>> {
        self.log.lock().push(format!("attach {}", query.path()));
        let inner = self.hub.attach(query, sink)?;
        Ok(Box::new(RecordingListener {
            path: query.path().to_string(),
            inner,
            log: self.log.clone(),
            detached: false,
        }))
    }
}

/// Keeps every sink it is handed so tests can replay late deliveries.
#[derive(Default)]
struct Capturing {
    sinks: Mutex<Vec<FeedSink>>,
}

struct NoopListener;

impl FeedListener for NoopListener {
    fn detach(&mut self) {}
}

impl LiveFeedTransport for Capturing {
    fn attach(&self, _query: &FeedQuery, sink: FeedSink) -> FeedResult<Box<dyn FeedListener>> {
        self.sinks.lock().push(sink);
        Ok(Box::new(NoopListener))
    }
}

#[tokio::test(start_paused = true)]
async fn signed_out_requests_stay_idle() {
    let h = Harness::new();
    let hub = MemoryFeedHub::new();
    let registry = h.registry(Arc::new(hub.clone()));

    let sub = registry.subscribe("products", vec![]);
    advance(1_000).await;

    assert_eq!(sub.state(), FeedState::idle());
    assert_eq!(hub.listener_count(), 0);
    assert_eq!(registry.feed_count(), 1);
    assert_eq!(registry.active_listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn feeds_attach_after_settle_delay() {
    let h = Harness::new();
    let hub = MemoryFeedHub::new();
    hub.set_document("products", "p1", json!({"name": "Arroz", "stock": 3}));
    let registry = h.registry(Arc::new(hub.clone()));
    let sub = registry.subscribe("products", vec![]);

    h.login().await;
    assert!(sub.state().loading);
    advance(99).await;
    assert_eq!(hub.listener_count(), 0);
    assert!(!registry.is_ready());

    advance(2).await;
    assert_eq!(hub.listener_count(), 1);
    assert_eq!(
        sub.state(),
        FeedState {
            data: FeedData::Collection(vec![json!({"name": "Arroz", "stock": 3})]),
            loading: false,
            error: None,
        }
    );

    hub.set_document("products", "p2", json!({"name": "Sal", "stock": 9}));
    assert_eq!(sub.state().data.records().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn subscriptions_after_settle_attach_immediately() {
    let h = Harness::new();
    let hub = MemoryFeedHub::new();
    let registry = h.registry(Arc::new(hub.clone()));
    h.login().await;
    advance(150).await;
    assert!(registry.is_ready());

    let sub = registry.subscribe("movements", vec![]);
    assert_eq!(hub.listener_count(), 1);
    assert_eq!(sub.state().data, FeedData::Collection(vec![]));
}

#[tokio::test(start_paused = true)]
async fn identical_requests_share_one_listener() {
    let h = Harness::new();
    let hub = MemoryFeedHub::new();
    let registry = h.registry(Arc::new(hub.clone()));
    h.login().await;
    advance(150).await;

    let low = || vec![Constraint::where_("stock", FilterOp::Lt, 5)];
    let a = registry.subscribe("products", low());
    let b = registry.subscribe("/products/", low());
    let c = registry.subscribe("products", vec![]);

    assert_eq!(registry.feed_count(), 2);
    assert_eq!(hub.listener_count(), 2);

    hub.set_document("products", "p1", json!({"stock": 1}));
    assert_eq!(a.state(), b.state());
    assert_eq!(c.state().data.records().len(), 1);

    drop(a);
    assert_eq!(hub.listener_count(), 2);
    drop(b);
    assert_eq!(hub.listener_count(), 1);
    assert_eq!(registry.feed_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn logout_detaches_everything_synchronously() {
    let h = Harness::new();
    let hub = MemoryFeedHub::new();
    hub.set_document("products", "p1", json!({"stock": 1}));
    let registry = h.registry(Arc::new(hub.clone()));
    let products = registry.subscribe("products", vec![]);
    let stats = registry.subscribe("stats/today", vec![]);
    h.login().await;
    advance(150).await;
    assert_eq!(hub.listener_count(), 2);

    h.session.logout();

    assert_eq!(hub.listener_count(), 0);
    assert_eq!(registry.active_listener_count(), 0);
    assert_eq!(products.state(), FeedState::idle());
    assert_eq!(stats.state(), FeedState::idle());

    hub.set_document("products", "p2", json!({"stock": 2}));
    assert_eq!(products.state(), FeedState::idle());
}

#[tokio::test(start_paused = true)]
async fn logout_during_settle_cancels_attach() {
    let h = Harness::new();
    let hub = MemoryFeedHub::new();
    let registry = h.registry(Arc::new(hub.clone()));
    let sub = registry.subscribe("products", vec![]);

    h.login().await;
    advance(50).await;
    h.session.logout();
    advance(500).await;

    assert_eq!(hub.attach_count(), 0);
    assert_eq!(sub.state(), FeedState::idle());
}

#[tokio::test(start_paused = true)]
async fn set_query_detaches_before_attaching() {
    let h = Harness::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let recording = Recording {
        hub: MemoryFeedHub::new(),
        log: log.clone(),
    };
    let registry = h.registry(Arc::new(recording));
    let sub = registry.subscribe("products", vec![]);
    h.login().await;
    advance(150).await;

    sub.set_query("movements", vec![]);
    sub.set_query("movements", vec![]);

    assert_eq!(
        *log.lock(),
        vec!["attach products", "detach products", "attach movements"]
    );
    assert_eq!(sub.query().unwrap().path(), "movements");
}

#[tokio::test(start_paused = true)]
async fn delivery_errors_keep_listener_but_close_detaches() {
    let h = Harness::new();
    let hub = MemoryFeedHub::new();
    let registry = h.registry(Arc::new(hub.clone()));
    let sub = registry.subscribe("products", vec![]);
    h.login().await;
    advance(150).await;

    hub.fail("products", FeedError::Transport("flaky".into()));
    let state = sub.state();
    assert_eq!(state.error, Some(FeedError::Transport("flaky".into())));
    assert!(!state.loading);
    assert_eq!(registry.active_listener_count(), 1);

    hub.set_document("products", "p1", json!({"stock": 1}));
    assert_eq!(sub.state().error, None);

    hub.close("products");
    assert_eq!(sub.state().error, Some(FeedError::Closed));
    assert_eq!(registry.active_listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn setup_failures_surface_in_state() {
    let h = Harness::new();
    let hub = MemoryFeedHub::new();
    hub.deny("audit");
    let registry = h.registry(Arc::new(hub.clone()));
    h.login().await;
    advance(150).await;

    let bad_path = registry.subscribe("products//p1", vec![]);
    assert!(matches!(bad_path.state().error, Some(FeedError::InvalidPath(_))));
    assert_eq!(registry.feed_count(), 0);

    let denied = registry.subscribe("audit", vec![]);
    let state = denied.state();
    assert!(matches!(state.error, Some(FeedError::PermissionDenied(_))));
    assert!(!state.loading);
    assert_eq!(hub.listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn late_deliveries_from_old_listener_are_discarded() {
    let h = Harness::new();
    let capturing = Arc::new(Capturing::default());
    let registry = h.registry(capturing.clone());
    let sub = registry.subscribe("products", vec![]);
    h.login().await;
    advance(150).await;

    let first = capturing.sinks.lock()[0].clone();
    first(FeedEvent::Snapshot(FeedData::Collection(vec![json!({"id": 1})])));
    assert_eq!(sub.state().data.records().len(), 1);

    h.session.logout();
    first(FeedEvent::Snapshot(FeedData::Collection(vec![json!({"id": 2})])));
    assert_eq!(sub.state(), FeedState::idle());

    h.login().await;
    advance(150).await;
    assert_eq!(capturing.sinks.lock().len(), 2);
    first(FeedEvent::Error(FeedError::Transport("late".into())));
    assert!(sub.state().loading);
    assert_eq!(sub.state().error, None);
}

#[tokio::test(start_paused = true)]
async fn callbacks_and_close() {
    let h = Harness::new();
    let hub = MemoryFeedHub::new();
    let registry = h.registry(Arc::new(hub.clone()));
    let sub = registry.subscribe("products", vec![]);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    sub.on_update(move |state| sink.lock().push(state.loading));

    h.login().await;
    advance(150).await;
    assert_eq!(*seen.lock(), vec![true, false]);

    let mut rx = sub.watch();
    sub.close();
    sub.close();
    assert!(sub.is_closed());
    assert_eq!(hub.listener_count(), 0);
    assert_eq!(registry.feed_count(), 0);
    assert!(rx.has_changed().unwrap());
    assert_eq!(*rx.borrow_and_update(), FeedState::idle());

    hub.set_document("products", "p1", json!({}));
    assert_eq!(seen.lock().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn reverification_reattaches_after_settle() {
    let h = Harness::new();
    let hub = MemoryFeedHub::new();
    let registry = h.registry(Arc::new(hub.clone()));
    let _sub = registry.subscribe("products", vec![]);
    h.login().await;
    advance(150).await;
    assert_eq!(hub.attach_count(), 1);

    let status = h.session.check_auth_status().await.unwrap();
    assert_eq!(status, SessionStatus::Authenticated);
    assert_eq!(h.api.calls_to("/verify-token"), 1);
    assert_eq!(hub.listener_count(), 0);

    advance(150).await;
    assert_eq!(hub.attach_count(), 2);
    assert_eq!(hub.listener_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn dropping_registry_detaches_listeners() {
    let h = Harness::new();
    let hub = MemoryFeedHub::new();
    let registry = h.registry(Arc::new(hub.clone()));
    let sub = registry.subscribe("products", vec![]);
    h.login().await;
    advance(150).await;

    drop(registry);
    assert_eq!(hub.listener_count(), 0);
    assert_eq!(sub.state(), FeedState::idle());

    h.session.logout();
    h.login().await;
    advance(150).await;
    assert_eq!(hub.listener_count(), 0);
}

/// Log out from inside `sub`'s update callback the first time `trigger`
/// matches.
fn logout_on_first(
    session: &Arc<SessionManager>,
    sub: &live_subscriptions::Subscription,
    trigger: fn(&FeedState) -> bool,
) {
    let session = Arc::clone(session);
    let fired = std::sync::atomic::AtomicBool::new(false);
    sub.on_update(move |state| {
        if trigger(state) && !fired.swap(true, std::sync::atomic::Ordering::SeqCst) {
            session.logout();
        }
    });
}

#[tokio::test(start_paused = true)]
async fn logout_from_first_delivery_stops_remaining_attaches() {
    let h = Harness::new();
    let hub = MemoryFeedHub::new();
    hub.set_document("products", "p1", json!({"name": "Arroz"}));
    hub.set_document("movements", "m1", json!({"qty": 2}));
    let registry = h.registry(Arc::new(hub.clone()));

    let products = registry.subscribe("products", vec![]);
    let movements = registry.subscribe("movements", vec![]);
    logout_on_first(&h.session, &products, |s| !s.data.is_empty());
    logout_on_first(&h.session, &movements, |s| !s.data.is_empty());

    h.login().await;
    advance(200).await;

    assert_eq!(h.session.status(), SessionStatus::Unauthenticated);
    assert_eq!(hub.listener_count(), 0);
    assert_eq!(registry.active_listener_count(), 0);
    assert_eq!(hub.attach_count(), 1);
    assert_eq!(products.state(), FeedState::idle());
    assert_eq!(movements.state(), FeedState::idle());
}

#[tokio::test(start_paused = true)]
async fn logout_from_attach_failure_stops_remaining_attaches() {
    let h = Harness::new();
    let hub = MemoryFeedHub::new();
    hub.deny("audit");
    let registry = h.registry(Arc::new(hub.clone()));

    let audit = registry.subscribe("audit", vec![]);
    let products = registry.subscribe("products", vec![]);
    logout_on_first(&h.session, &audit, |s| s.error.is_some());

    h.login().await;
    advance(200).await;

    assert_eq!(h.session.status(), SessionStatus::Unauthenticated);
    assert_eq!(hub.listener_count(), 0);
    assert_eq!(registry.active_listener_count(), 0);
    assert_eq!(products.state(), FeedState::idle());

    // The next session attaches normally.
    h.login().await;
    advance(200).await;
    assert_eq!(hub.listener_count(), 1);
    assert_eq!(hub.listener_count_for("products"), 1);
}
