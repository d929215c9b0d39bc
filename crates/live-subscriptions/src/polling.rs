//! Live feeds emulated by polling the REST backend.
//!
//! Each listener re-fetches `GET /<path>` on an interval and pushes a
//! snapshot only when the payload changed. Collection constraints are
//! evaluated client side.

use crate::error::{FeedError, FeedResult};
use crate::feed::{FeedData, FeedEvent};
use crate::query::{FeedQuery, FeedShape};
use crate::transport::{FeedListener, FeedSink, LiveFeedTransport};
use api_transport::{RequestOptions, Transport, TransportError};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use token_store::TokenReader;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

pub struct PollingFeedTransport {
    transport: Arc<dyn Transport>,
    tokens: TokenReader,
    interval: Duration,
    runtime: Handle,
}

impl PollingFeedTransport {
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(transport: Arc<dyn Transport>, tokens: TokenReader, interval: Duration) -> Self {
        Self {
            transport,
            tokens,
            interval,
            runtime: Handle::current(),
        }
    }
}

struct PollingListener {
    task: Option<JoinHandle<()>>,
}

impl FeedListener for PollingListener {
    fn detach(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PollingListener {
    fn drop(&mut self) {
        self.detach();
    }
}

impl LiveFeedTransport for PollingFeedTransport {
    fn attach(&self, query: &FeedQuery, sink: FeedSink) -> FeedResult<Box<dyn FeedListener>> {
        let shape = query.shape()?;
        let owned = query.clone();
        let transport = Arc::clone(&self.transport);
        let tokens = self.tokens.clone();
        let period = self.interval;

        let task = self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last: Option<Result<FeedData, FeedError>> = None;

            loop {
                ticker.tick().await;
                let result = fetch(transport.as_ref(), &tokens, &owned, shape).await;
                if last.as_ref() == Some(&result) {
                    continue;
                }
                let event = match &result {
                    Ok(data) => FeedEvent::Snapshot(data.clone()),
                    Err(e) => {
                        warn!(path = owned.path(), error = %e, "Feed poll failed");
                        FeedEvent::Error(e.clone())
                    }
                };
                last = Some(result);
                sink(event);
            }
        });
        debug!(path = query.path(), interval_ms = period.as_millis() as u64, "Polling feed attached");

        Ok(Box::new(PollingListener { task: Some(task) }))
    }
}

async fn fetch(
    transport: &dyn Transport,
    tokens: &TokenReader,
    query: &FeedQuery,
    shape: FeedShape,
) -> Result<FeedData, FeedError> {
    let token = tokens
        .get()
        .map_err(|e| FeedError::Transport(format!("token unavailable: {e}")))?;
    let options = RequestOptions {
        bearer_token: token,
    };
    let path = format!("/{}", query.path());

    match (shape, transport.get(&path, options).await) {
        (FeedShape::Document, Ok(Value::Null)) => Ok(FeedData::Document(None)),
        (FeedShape::Document, Ok(doc)) => Ok(FeedData::Document(Some(doc))),
        (FeedShape::Document, Err(TransportError::Http { status: 404, .. })) => {
            Ok(FeedData::Document(None))
        }
        (FeedShape::Collection, Ok(body)) => {
            let records = collection_records(body).ok_or_else(|| {
                FeedError::Transport(format!("`{}` did not return a list", query.path()))
            })?;
            Ok(FeedData::Collection(query.apply(records)))
        }
        (_, Err(e)) if e.is_unauthorized() => Err(FeedError::PermissionDenied(e.to_string())),
        (_, Err(e)) => Err(FeedError::Transport(e.to_string())),
    }
}

/// Accept a bare array or an object wrapping one under `items` or `data`.
fn collection_records(body: Value) -> Option<Vec<Value>> {
    match body {
        Value::Array(items) => Some(items),
        Value::Object(mut map) => ["items", "data"].iter().find_map(|key| match map.remove(*key) {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        }),
        Value::Null => Some(Vec::new()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api_transport::mock::MockTransport;
    use api_transport::Method;
    use parking_lot::Mutex;
    use serde_json::json;
    use token_store::{MemoryStorage, TokenStore};

    fn setup(interval_ms: u64) -> (Arc<MockTransport>, PollingFeedTransport, TokenStore) {
        let mock = Arc::new(MockTransport::new());
        let store = TokenStore::new(Box::new(MemoryStorage::new()));
        store.set("T").unwrap();
        let polling = PollingFeedTransport::new(
            mock.clone() as Arc<dyn Transport>,
            store.reader(),
            Duration::from_millis(interval_ms),
        );
        (mock, polling, store)
    }

    fn recording_sink() -> (FeedSink, Arc<Mutex<Vec<FeedEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = events.clone();
        let sink: FeedSink = Arc::new(move |event| sink_events.lock().push(event));
        (sink, events)
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_only_changes() {
        let (mock, polling, _store) = setup(1000);
        mock.enqueue(Method::Get, "/products", Ok(json!([{"id": 1}])))
            .enqueue(Method::Get, "/products", Ok(json!([{"id": 1}])))
            .on(Method::Get, "/products", Ok(json!({"items": [{"id": 1}, {"id": 2}]})));

        let (sink, events) = recording_sink();
        let _listener = polling.attach(&FeedQuery::collection("products"), sink).unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(events.lock().len(), 1);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(mock.calls_to("/products"), 2);
        assert_eq!(events.lock().len(), 1);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(
            events.lock().last(),
            Some(&FeedEvent::Snapshot(FeedData::Collection(vec![
                json!({"id": 1}),
                json!({"id": 2})
            ])))
        );
        assert_eq!(mock.calls()[0].bearer_token.as_deref(), Some("T"));
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_is_permission_denied() {
        let (mock, polling, _store) = setup(1000);
        mock.on(
            Method::Get,
            "/reports",
            Err(TransportError::Http {
                status: 403,
                message: "forbidden".into(),
            }),
        );

        let (sink, events) = recording_sink();
        let _listener = polling.attach(&FeedQuery::collection("reports"), sink).unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;

        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            FeedEvent::Error(FeedError::PermissionDenied(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_document_is_none() {
        let (mock, polling, _store) = setup(1000);
        mock.on(
            Method::Get,
            "/products/p9",
            Err(TransportError::Http {
                status: 404,
                message: "not found".into(),
            }),
        );

        let (sink, events) = recording_sink();
        let _listener = polling.attach(&FeedQuery::collection("products/p9"), sink).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            *events.lock(),
            vec![FeedEvent::Snapshot(FeedData::Document(None))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn detach_stops_polling() {
        let (mock, polling, _store) = setup(1000);
        mock.on(Method::Get, "/products", Ok(json!([])));

        let (sink, _events) = recording_sink();
        let mut listener = polling.attach(&FeedQuery::collection("products"), sink).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        listener.detach();
        let calls = mock.call_count();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(mock.call_count(), calls);
    }

    #[tokio::test]
    async fn invalid_path_fails_synchronously() {
        let (_mock, polling, _store) = setup(1000);
        let (sink, _events) = recording_sink();
        assert!(matches!(
            polling.attach(&FeedQuery::collection(""), sink),
            Err(FeedError::InvalidPath(_))
        ));
    }

    #[test]
    fn wrapped_collections() {
        assert_eq!(collection_records(json!([1])), Some(vec![json!(1)]));
        assert_eq!(collection_records(json!({"data": [2]})), Some(vec![json!(2)]));
        assert_eq!(collection_records(json!({"other": 1})), None);
        assert_eq!(collection_records(json!("x")), None);
    }
}
