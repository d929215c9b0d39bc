//! Scripted transport for tests.
//!
//! Routes are keyed by method and path. One-shot replies queued with
//! [`MockTransport::enqueue`] are consumed first, then the persistent reply
//! set with [`MockTransport::on`]. Unknown routes answer HTTP 404.

use crate::{Method, RequestOptions, Transport, TransportError, TransportResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

#[derive(Clone, Debug)]
struct Reply {
    result: TransportResult<Value>,
    delay: Option<Duration>,
}

#[derive(Default)]
struct Route {
    queued: VecDeque<Reply>,
    persistent: Option<Reply>,
}

/// One request observed by the mock.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub bearer_token: Option<String>,
}

#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(Method, String), Route>>,
    calls: Mutex<Vec<RecordedCall>>,
}

fn normalize(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request to this route with `result`.
    pub fn on(&self, method: Method, path: &str, result: TransportResult<Value>) -> &Self {
        self.route(method, path).persistent = Some(Reply {
            result,
            delay: None,
        });
        self
    }

    /// Like [`on`](Self::on), but each reply is held back for `delay`.
    pub fn on_delayed(
        &self,
        method: Method,
        path: &str,
        delay: Duration,
        result: TransportResult<Value>,
    ) -> &Self {
        self.route(method, path).persistent = Some(Reply {
            result,
            delay: Some(delay),
        });
        self
    }

    /// Answer the next request to this route with `result`.
    pub fn enqueue(&self, method: Method, path: &str, result: TransportResult<Value>) -> &Self {
        self.route(method, path).queued.push_back(Reply {
            result,
            delay: None,
        });
        self
    }

    pub fn enqueue_delayed(
        &self,
        method: Method,
        path: &str,
        delay: Duration,
        result: TransportResult<Value>,
    ) -> &Self {
        self.route(method, path).queued.push_back(Reply {
            result,
            delay: Some(delay),
        });
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        let path = normalize(path);
        self.calls.lock().iter().filter(|c| c.path == path).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn route(&self, method: Method, path: &str) -> parking_lot::MappedMutexGuard<'_, Route> {
        parking_lot::MutexGuard::map(self.routes.lock(), |routes| {
            routes.entry((method, normalize(path))).or_default()
        })
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> TransportResult<Value> {
        let path = normalize(path);
        self.calls.lock().push(RecordedCall {
            method,
            path: path.clone(),
            body,
            bearer_token: options.bearer_token,
        });

        let reply = {
            let mut routes = self.routes.lock();
            routes.get_mut(&(method, path.clone())).and_then(|route| {
                route
                    .queued
                    .pop_front()
                    .or_else(|| route.persistent.clone())
            })
        };

        let Some(reply) = reply else {
            return Err(TransportError::Http {
                status: 404,
                message: format!("no mock route for {method} {path}"),
            });
        };

        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        reply.result
    }
}
