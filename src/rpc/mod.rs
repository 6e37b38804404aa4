//! Request/response correlation over a [`ConnectionManager`].
//!
//! Many callers share one connection. Each call gets a fresh correlation id
//! and a pending entry; the inbound frame carrying that id completes it.
//! Frames without an id are pushes, routed to topic subscribers.
//!
//! A pending entry is removed exactly once, by whichever of response,
//! timeout or connection loss comes first. Whoever removes it produces the
//! outcome, so a call can never resolve twice.

mod error;


pub use error::RpcClientError;

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionState, ListenerId};
use crate::protocol::{self, ClientFrame, InboundFrame, RequestKind, RpcError};

/// Default time a call waits for its response.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

type Completion = oneshot::Sender<Result<Value, RpcClientError>>;
type PushHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handle returned by [`RpcClient::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct PendingRequest {
    method: String,
    params: Value,
    created_at: Instant,
    deadline: Instant,
    completion: Completion,
}

#[derive(Default)]
struct Topics {
    next_id: u64,
    handlers: HashMap<String, Vec<(SubscriptionId, PushHandler)>>,
}

struct Inner {
    connection: ConnectionManager,
    pending: Mutex<HashMap<String, PendingRequest>>,
    topics: Mutex<Topics>,
    next_id: AtomicU64,
    default_timeout: Duration,
    listeners: Mutex<Vec<ListenerId>>,
}

/// Correlating RPC client.
///
/// Cheap to clone; clones share the pending set and subscriptions.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

impl fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClient")
            .field("connection", &self.inner.connection)
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl RpcClient {
    /// Attaches a correlator to `connection`.
    ///
    /// Register it before any other listener that expects pending calls to
    /// have already failed when it sees a disconnect.
    pub fn new(connection: ConnectionManager, default_timeout: Duration) -> Self {
        let inner = Arc::new(Inner {
            connection,
            pending: Mutex::new(HashMap::new()),
            topics: Mutex::new(Topics::default()),
            next_id: AtomicU64::new(0),
            default_timeout,
            listeners: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&inner);
        let on_message = inner.connection.on_message(move |text| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_frame(text);
            }
        });
        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let on_state = inner.connection.on_state_change(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_event(event);
            }
        });
        *inner.lock_listeners() = vec![on_message, on_state];

        Self { inner }
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }

    /// Issues a state-changing call and waits for its outcome.
    ///
    /// Uses the default timeout when `timeout` is `None`.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, RpcClientError> {
        self.inner
            .request(RequestKind::Command, method, params, timeout)
            .await
    }

    /// Issues a read-only call and waits for its outcome.
    pub async fn query(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, RpcClientError> {
        self.inner
            .request(RequestKind::Query, method, params, timeout)
            .await
    }

    /// [`call`](Self::call) with the result decoded into `T`.
    pub async fn call_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<T, RpcClientError> {
        let value = self.call(method, params, timeout).await?;
        serde_json::from_value(value).map_err(|source| RpcClientError::Decode {
            method: method.to_string(),
            source,
        })
    }

    /// Calls outstanding right now.
    pub fn pending_count(&self) -> usize {
        self.inner.lock_pending().len()
    }

    /// Registers `handler` for events pushed on `topic`.
    ///
    /// Subscriptions outlive reconnects: the daemon is asked again for every
    /// subscribed topic each time the session reaches `Connected`.
    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let (id, first) = {
            let mut topics = self.inner.lock_topics();
            topics.next_id += 1;
            let id = SubscriptionId(topics.next_id);
            let entry = topics.handlers.entry(topic.clone()).or_default();
            entry.push((id, Arc::new(handler)));
            (id, entry.len() == 1)
        };
        if first && self.inner.connection.state().is_connected() {
            self.inner.spawn_channel_request(ChannelOp::Subscribe, topic);
        }
        id
    }

    /// Removes a handler. The last handler for a topic also tells the daemon
    /// to stop pushing it.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let emptied = {
            let mut topics = self.inner.lock_topics();
            let Some(topic) = topics
                .handlers
                .iter()
                .find(|(_, handlers)| handlers.iter().any(|(hid, _)| *hid == id))
                .map(|(topic, _)| topic.clone())
            else {
                return false;
            };
            let handlers = topics.handlers.entry(topic.clone()).or_default();
            handlers.retain(|(hid, _)| *hid != id);
            if handlers.is_empty() {
                topics.handlers.remove(&topic);
                Some(topic)
            } else {
                None
            }
        };
        if let Some(topic) = emptied {
            if self.inner.connection.state().is_connected() {
                self.inner.spawn_channel_request(ChannelOp::Unsubscribe, topic);
            }
        }
        true
    }

    /// Handlers currently registered for `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .lock_topics()
            .handlers
            .get(topic)
            .map_or(0, Vec::len)
    }
}

#[derive(Debug, Clone, Copy)]
enum ChannelOp {
    Subscribe,
    Unsubscribe,
}

impl Inner {
    fn lock_pending(&self) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_topics(&self) -> MutexGuard<'_, Topics> {
        self.topics.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<ListenerId>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_id(&self) -> String {
        (self.next_id.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    fn take_pending(&self, id: &str) -> Option<PendingRequest> {
        self.lock_pending().remove(id)
    }

    async fn request(
        &self,
        kind: RequestKind,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, RpcClientError> {
        let id = self.next_id();
        let frame = kind.frame(id.clone(), method.to_string(), params.clone());
        self.exchange(frame, method, params, timeout).await
    }

    /// Registers the pending entry, sends `frame` and waits for the outcome.
    async fn exchange(
        &self,
        frame: ClientFrame,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, RpcClientError> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let id = frame.id().to_string();
        let text = frame.to_json().map_err(|source| RpcClientError::Encode {
            method: method.to_string(),
            source,
        })?;

        let (tx, mut rx) = oneshot::channel();
        let now = Instant::now();
        self.lock_pending().insert(
            id.clone(),
            PendingRequest {
                method: method.to_string(),
                params,
                created_at: now,
                deadline: now + timeout,
                completion: tx,
            },
        );

        if let Err(err) = self.connection.send(text) {
            if self.take_pending(&id).is_some() {
                tracing::debug!(%id, method, state = %err.state, "call rejected: not connected");
                return Err(err.into());
            }
            // Already drained by a disconnect; its outcome is in the channel.
        } else {
            tracing::trace!(%id, method, "request sent");
        }

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RpcClientError::ConnectionLost {
                method: method.to_string(),
            }),
            Err(_) => match self.take_pending(&id) {
                Some(request) => {
                    tracing::warn!(
                        %id,
                        method,
                        timeout_ms = timeout.as_millis() as u64,
                        "call timed out"
                    );
                    tracing::trace!(%id, params = %request.params, overdue_ms = request.deadline.elapsed().as_millis() as u64, "timed out request");
                    Err(RpcClientError::Timeout {
                        method: method.to_string(),
                        timeout,
                    })
                }
                // Completed concurrently with the deadline.
                None => rx.await.unwrap_or_else(|_| {
                    Err(RpcClientError::ConnectionLost {
                        method: method.to_string(),
                    })
                }),
            },
        }
    }

    fn handle_frame(&self, text: &str) {
        match protocol::decode(text) {
            Ok(InboundFrame::Response { id, outcome }) => self.resolve(&id, outcome),
            Ok(InboundFrame::Push { topic, payload }) => self.dispatch_push(&topic, &payload),
            Ok(InboundFrame::Handshake { version }) => {
                tracing::debug!(version = version.as_deref().unwrap_or("unknown"), "daemon handshake");
            }
            Err(err) => tracing::warn!(error = %err, "dropping malformed frame"),
        }
    }

    fn resolve(&self, id: &str, outcome: Result<Value, RpcError>) {
        let Some(request) = self.take_pending(id) else {
            tracing::warn!(%id, "dropping response with no matching request");
            return;
        };
        let elapsed_ms = request.created_at.elapsed().as_millis() as u64;
        let outcome = match outcome {
            Ok(value) => {
                tracing::debug!(%id, method = %request.method, elapsed_ms, "call completed");
                Ok(value)
            }
            Err(source) => {
                tracing::debug!(%id, method = %request.method, code = %source.code, elapsed_ms, "call failed");
                Err(RpcClientError::Rpc {
                    method: request.method,
                    source,
                })
            }
        };
        let _ = request.completion.send(outcome);
    }

    fn dispatch_push(&self, topic: &str, payload: &Value) {
        let handlers: Vec<PushHandler> = self
            .lock_topics()
            .handlers
            .get(topic)
            .map(|handlers| handlers.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();
        if handlers.is_empty() {
            tracing::trace!(topic, "push with no subscribers");
            return;
        }
        for handler in handlers {
            handler(payload);
        }
    }

    fn handle_event(self: &Arc<Self>, event: &ConnectionEvent) {
        let ConnectionEvent::StateChanged { to, .. } = event else {
            return;
        };
        match to {
            ConnectionState::Connected => self.resubscribe_all(),
            ConnectionState::Disconnected | ConnectionState::Reconnecting => {
                self.fail_all_pending()
            }
            ConnectionState::Connecting => {}
        }
    }

    fn fail_all_pending(&self) {
        let drained: Vec<PendingRequest> = self.lock_pending().drain().map(|(_, r)| r).collect();
        if drained.is_empty() {
            return;
        }
        tracing::warn!(count = drained.len(), "failing in-flight calls: connection lost");
        for request in drained {
            let _ = request.completion.send(Err(RpcClientError::ConnectionLost {
                method: request.method,
            }));
        }
    }

    fn resubscribe_all(self: &Arc<Self>) {
        let topics: Vec<String> = self.lock_topics().handlers.keys().cloned().collect();
        for topic in topics {
            self.spawn_channel_request(ChannelOp::Subscribe, topic);
        }
    }

    /// Sends a subscribe/unsubscribe request in the background.
    fn spawn_channel_request(self: &Arc<Self>, op: ChannelOp, channel: String) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(%channel, "no runtime; channel request deferred to next connect");
            return;
        };
        let inner = Arc::clone(self);
        runtime.spawn(async move {
            let id = inner.next_id();
            let (frame, label) = match op {
                ChannelOp::Subscribe => (
                    ClientFrame::Subscribe {
                        id,
                        channel: channel.clone(),
                    },
                    "subscribe",
                ),
                ChannelOp::Unsubscribe => (
                    ClientFrame::Unsubscribe {
                        id,
                        channel: channel.clone(),
                    },
                    "unsubscribe",
                ),
            };
            match inner.exchange(frame, label, Value::Null, None).await {
                Ok(_) => tracing::debug!(%channel, op = label, "channel request acknowledged"),
                Err(err) => tracing::warn!(%channel, op = label, error = %err, "channel request failed"),
            }
        });
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let ids = std::mem::take(&mut *self.lock_listeners());
        for id in ids {
            self.connection.remove_listener(id);
        }
    }
}
