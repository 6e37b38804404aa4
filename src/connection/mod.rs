//! Connection lifecycle for one logical link to the daemon.
//!
//! A [`ConnectionManager`] owns a single session: its lifecycle state, the
//! exclusive transport handle, the consecutive-failure counter and the last
//! error seen. A background driver task owns the inbound side of the
//! transport and is the only place state transitions happen, so listeners
//! observe transitions one at a time and in order.
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!                     ^             |
//!                     |        (peer drop)
//!                  backoff          v
//!                     +------- Reconnecting
//! ```
//!
//! A failed attempt moves `Connecting` to `Reconnecting` until the policy's
//! attempt budget is spent; then the session lands in `Disconnected`, a
//! [`ConnectionEvent::ReconnectExhausted`] is emitted and nothing happens
//! until [`ConnectionManager::reconnect`] is called.

pub mod backoff;
pub mod transport;


use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

pub use backoff::ReconnectPolicy;
pub use transport::{
    Connector, MemoryConnector, MemoryListener, MemoryPeer, Transport, TransportError,
    WebSocketConnector,
};

use transport::{FrameSink, FrameStream};

/// Default bound on a single connect attempt, handshake included.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Notification delivered to state listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Emitted exactly once per transition.
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// The attempt budget is spent. No further automatic attempts are made.
    ReconnectExhausted {
        attempts: u32,
        last_error: Option<String>,
    },
}

/// Failure of a connect attempt awaited by [`ConnectionManager::connect`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("daemon at {endpoint} is unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("handshake with daemon at {endpoint} failed: {reason}")]
    Handshake { endpoint: String, reason: String },

    #[error("connecting to daemon at {endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("connection was closed before it was established")]
    Closed,
}

impl ConnectionError {
    fn from_transport(endpoint: &str, err: TransportError) -> Self {
        match err {
            TransportError::Unreachable(reason) => ConnectionError::Unreachable {
                endpoint: endpoint.to_string(),
                reason,
            },
            TransportError::Handshake(reason) => ConnectionError::Handshake {
                endpoint: endpoint.to_string(),
                reason,
            },
        }
    }
}

/// A frame was offered while the session was not connected.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("not connected to daemon (state: {state})")]
pub struct NotConnected {
    pub state: ConnectionState,
}

/// Handle returned by listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type MessageHandler = Arc<dyn Fn(&str) + Send + Sync>;
type EventHandler = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// Endpoint and retry settings for one manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub endpoint: String,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl ConnectionOptions {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

enum Control {
    Close(oneshot::Sender<()>),
    RetryNow,
}

struct Session {
    state: ConnectionState,
    writer: Option<FrameSink>,
    attempts: u32,
    last_error: Option<String>,
    control: Option<mpsc::UnboundedSender<Control>>,
    waiters: Vec<oneshot::Sender<Result<(), ConnectionError>>>,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    messages: Vec<(ListenerId, MessageHandler)>,
    events: Vec<(ListenerId, EventHandler)>,
}

struct Shared {
    options: ConnectionOptions,
    connector: Arc<dyn Connector>,
    session: Mutex<Session>,
    listeners: Mutex<Listeners>,
}

/// Cloneable handle to one daemon session.
///
/// The driver task only holds a weak reference; once every handle is
/// dropped the driver releases the transport and exits.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.shared.options.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(options: ConnectionOptions, connector: Arc<dyn Connector>) -> Self {
        Self {
            shared: Arc::new(Shared {
                options,
                connector,
                session: Mutex::new(Session {
                    state: ConnectionState::Disconnected,
                    writer: None,
                    attempts: 0,
                    last_error: None,
                    control: None,
                    waiters: Vec::new(),
                }),
                listeners: Mutex::new(Listeners::default()),
            }),
        }
    }

    /// Manager speaking WebSocket to `options.endpoint`.
    pub fn websocket(options: ConnectionOptions) -> Self {
        Self::new(options, Arc::new(WebSocketConnector))
    }

    pub fn endpoint(&self) -> &str {
        &self.shared.options.endpoint
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.shared.options
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock_session().state
    }

    /// Consecutive failed attempts since the last successful connect.
    pub fn attempts(&self) -> u32 {
        self.shared.lock_session().attempts
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.lock_session().last_error.clone()
    }

    /// Establishes the session and waits for the outcome of the next attempt.
    ///
    /// Returns immediately when already connected. If the attempt fails the
    /// error is returned, but the session keeps retrying in the background
    /// under the reconnect policy.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let outcome = {
            let mut session = self.shared.lock_session();
            if session.state.is_connected() {
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            session.waiters.push(tx);
            if session.control.is_none() {
                session.attempts = 0;
                session.last_error = None;
                let (control_tx, control_rx) = mpsc::unbounded_channel();
                session.control = Some(control_tx);
                let driver = Driver {
                    shared: Arc::downgrade(&self.shared),
                    control: control_rx,
                };
                tokio::spawn(driver.run());
            }
            rx
        };
        outcome.await.unwrap_or(Err(ConnectionError::Closed))
    }

    /// Starts a fresh connect cycle with the attempt counter reset.
    ///
    /// This is the way out of the exhausted state. While a backoff delay is
    /// pending it cuts the delay short.
    pub async fn reconnect(&self) -> Result<(), ConnectionError> {
        {
            let mut session = self.shared.lock_session();
            if let Some(control) = session.control.clone() {
                session.attempts = 0;
                let _ = control.send(Control::RetryNow);
            }
        }
        self.connect().await
    }

    /// Hands one frame to the transport.
    pub fn send(&self, frame: impl Into<String>) -> Result<(), NotConnected> {
        let session = self.shared.lock_session();
        let not_connected = NotConnected {
            state: session.state,
        };
        match (&session.writer, session.state) {
            (Some(writer), ConnectionState::Connected) => {
                writer.send(frame.into()).map_err(|_| not_connected)
            }
            _ => Err(not_connected),
        }
    }

    /// Registers a handler for every inbound frame.
    pub fn on_message<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let mut listeners = self.shared.lock_listeners();
        let id = listeners.allocate();
        listeners.messages.push((id, Arc::new(handler)));
        id
    }

    /// Registers a handler for state transitions and the exhaustion notice.
    pub fn on_state_change<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.shared.lock_listeners();
        let id = listeners.allocate();
        listeners.events.push((id, Arc::new(handler)));
        id
    }

    /// Removes a handler. Returns `false` if the id was unknown.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.shared.lock_listeners();
        let before = listeners.messages.len() + listeners.events.len();
        listeners.messages.retain(|(lid, _)| *lid != id);
        listeners.events.retain(|(lid, _)| *lid != id);
        before != listeners.messages.len() + listeners.events.len()
    }

    /// Releases the transport and settles in `Disconnected`.
    ///
    /// Resolves once the driver has shut down. Closing an idle manager is a
    /// no-op and emits nothing.
    pub async fn close(&self) {
        let control = self.shared.lock_session().control.clone();
        let Some(control) = control else {
            return;
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        if control.send(Control::Close(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

impl Listeners {
    fn allocate(&mut self) -> ListenerId {
        self.next_id += 1;
        ListenerId(self.next_id)
    }
}

impl Shared {
    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Applies `update` and the state change under one lock, then notifies.
    fn transition<F>(&self, to: ConnectionState, update: F)
    where
        F: FnOnce(&mut Session),
    {
        let from = {
            let mut session = self.lock_session();
            update(&mut session);
            std::mem::replace(&mut session.state, to)
        };
        if from != to {
            tracing::debug!(endpoint = %self.options.endpoint, %from, %to, "connection state changed");
            self.emit(&ConnectionEvent::StateChanged { from, to });
        }
    }

    fn emit(&self, event: &ConnectionEvent) {
        // Handlers may register listeners or send, so call them unlocked.
        let handlers: Vec<EventHandler> = self
            .lock_listeners()
            .events
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(event);
        }
    }

    fn dispatch(&self, frame: &str) {
        let handlers: Vec<MessageHandler> = self
            .lock_listeners()
            .messages
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(frame);
        }
    }

    fn take_waiters(&self) -> Vec<oneshot::Sender<Result<(), ConnectionError>>> {
        std::mem::take(&mut self.lock_session().waiters)
    }

    fn resolve_waiters(&self, outcome: Result<(), ConnectionError>) {
        for waiter in self.take_waiters() {
            let _ = waiter.send(outcome.clone());
        }
    }

    async fn open(&self) -> Result<Transport, ConnectionError> {
        let endpoint = self.options.endpoint.as_str();
        let timeout = self.options.connect_timeout;
        match tokio::time::timeout(timeout, self.connector.connect(endpoint)).await {
            Ok(Ok(transport)) => Ok(transport),
            Ok(Err(err)) => Err(ConnectionError::from_transport(endpoint, err)),
            Err(_) => Err(ConnectionError::Timeout {
                endpoint: endpoint.to_string(),
                timeout,
            }),
        }
    }
}

// ----------------------------------------------------------------------------
// Driver
// ----------------------------------------------------------------------------

enum Interrupt<T> {
    Done(T),
    Retry,
    Closed(Option<oneshot::Sender<()>>),
}

struct Driver {
    shared: Weak<Shared>,
    control: mpsc::UnboundedReceiver<Control>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            let Some(shared) = self.shared.upgrade() else {
                return;
            };
            shared.transition(ConnectionState::Connecting, |session| {
                session.writer = None;
            });
            let open = async move { shared.open().await };
            let attempt = match self.interruptible(open, false).await {
                Interrupt::Done(attempt) => attempt,
                Interrupt::Retry => continue,
                Interrupt::Closed(ack) => return self.finish(ack),
            };

            let Some(shared) = self.shared.upgrade() else {
                return;
            };
            let (shared, failures) = match attempt {
                Ok(transport) => {
                    let (writer, reader) = transport.split();
                    shared.transition(ConnectionState::Connected, |session| {
                        session.writer = Some(writer);
                        session.attempts = 0;
                        session.last_error = None;
                    });
                    tracing::info!(endpoint = %shared.options.endpoint, "connected to daemon");
                    shared.resolve_waiters(Ok(()));
                    drop(shared);

                    if let Some(ack) = self.pump(reader).await {
                        return self.finish(ack);
                    }

                    let Some(shared) = self.shared.upgrade() else {
                        return;
                    };
                    tracing::warn!(endpoint = %shared.options.endpoint, "daemon connection dropped");
                    shared.transition(ConnectionState::Reconnecting, |session| {
                        session.writer = None;
                        session.last_error = Some("connection dropped".to_string());
                    });
                    (shared, 0)
                }
                Err(err) => {
                    let failures = {
                        let mut session = shared.lock_session();
                        session.attempts += 1;
                        session.last_error = Some(err.to_string());
                        session.attempts
                    };
                    tracing::debug!(
                        endpoint = %shared.options.endpoint,
                        attempt = failures,
                        error = %err,
                        "connect attempt failed"
                    );
                    shared.resolve_waiters(Err(err.clone()));

                    if shared.options.reconnect.is_exhausted(failures) {
                        tracing::error!(
                            endpoint = %shared.options.endpoint,
                            attempts = failures,
                            "giving up on daemon connection"
                        );
                        // control and waiters leave with the state change; a
                        // connect() after this point spawns a new driver
                        let mut stranded = Vec::new();
                        shared.transition(ConnectionState::Disconnected, |session| {
                            session.control = None;
                            stranded = std::mem::take(&mut session.waiters);
                        });
                        for waiter in stranded {
                            let _ = waiter.send(Err(err.clone()));
                        }
                        shared.emit(&ConnectionEvent::ReconnectExhausted {
                            attempts: failures,
                            last_error: Some(err.to_string()),
                        });
                        return;
                    }
                    shared.transition(ConnectionState::Reconnecting, |_| {});
                    (shared, failures)
                }
            };

            let delay = shared.options.reconnect.delay_for(failures);
            drop(shared);
            tracing::debug!(delay_ms = delay.as_millis() as u64, "waiting before reconnect");
            if let Interrupt::Closed(ack) = self.interruptible(tokio::time::sleep(delay), true).await
            {
                return self.finish(ack);
            }
        }
    }

    /// Forwards inbound frames until the peer goes away.
    ///
    /// Returns `Some(ack)` when a close was requested instead.
    async fn pump(&mut self, mut reader: FrameStream) -> Option<Option<oneshot::Sender<()>>> {
        loop {
            match self.interruptible(reader.recv(), false).await {
                Interrupt::Done(Some(frame)) => {
                    let shared = self.shared.upgrade()?;
                    shared.dispatch(&frame);
                }
                Interrupt::Done(None) => return None,
                Interrupt::Retry => {}
                Interrupt::Closed(ack) => return Some(ack),
            }
        }
    }

    /// Races `future` against control messages.
    ///
    /// `RetryNow` only interrupts when `wake_on_retry` is set.
    async fn interruptible<F: Future>(&mut self, future: F, wake_on_retry: bool) -> Interrupt<F::Output> {
        tokio::pin!(future);
        loop {
            tokio::select! {
                output = &mut future => return Interrupt::Done(output),
                control = self.control.recv() => match control {
                    Some(Control::RetryNow) if wake_on_retry => return Interrupt::Retry,
                    Some(Control::RetryNow) => {}
                    Some(Control::Close(ack)) => return Interrupt::Closed(Some(ack)),
                    None => return Interrupt::Closed(None),
                },
            }
        }
    }

    fn finish(self, ack: Option<oneshot::Sender<()>>) {
        if let Some(shared) = self.shared.upgrade() {
            let mut stranded = Vec::new();
            shared.transition(ConnectionState::Disconnected, |session| {
                session.writer = None;
                session.control = None;
                stranded = std::mem::take(&mut session.waiters);
            });
            for waiter in stranded {
                let _ = waiter.send(Err(ConnectionError::Closed));
            }
            tracing::debug!(endpoint = %shared.options.endpoint, "connection closed");
        }
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }
}
