//! Daemon event stream.
//!
//! The daemon's monitoring endpoint pushes `{type, payload}` frames: state
//! snapshots, key events, latency statistics and heartbeats. [`EventStream`]
//! decodes them and fans them out over a broadcast channel. The stream runs
//! on its own [`ConnectionManager`], so it reconnects independently of the
//! RPC link.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ListenerId};
use crate::protocol::FrameError;

/// Events buffered per subscriber before the slowest one starts lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Snapshot of the daemon's remapping state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonState {
    pub modifiers: Vec<String>,
    pub locks: Vec<String>,
    pub layer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_profile: Option<String>,
}

/// One key press or release. Times are in microseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEventData {
    pub timestamp: u64,
    #[serde(rename = "keyCode")]
    pub key_code: String,
    /// `"press"` or `"release"`.
    #[serde(rename = "eventType")]
    pub event_type: String,
    pub input: String,
    pub output: String,
    pub latency: u64,
}

/// Processing latency statistics in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub min: u64,
    pub avg: u64,
    pub max: u64,
    pub p95: u64,
    pub p99: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DaemonEvent {
    State(DaemonState),
    KeyEvent(KeyEventData),
    Latency(LatencyStats),
    /// Liveness tick; `timestamp` is in seconds.
    Heartbeat { timestamp: u64 },
    /// Sent once per connection.
    Connected { version: Option<String> },
    /// A frame type this client does not know about.
    Other { kind: String, payload: Value },
}

impl DaemonEvent {
    /// The frame `type` this event arrived as.
    pub fn kind(&self) -> &str {
        match self {
            DaemonEvent::State(_) => "state",
            DaemonEvent::KeyEvent(_) => "event",
            DaemonEvent::Latency(_) => "latency",
            DaemonEvent::Heartbeat { .. } => "heartbeat",
            DaemonEvent::Connected { .. } => "connected",
            DaemonEvent::Other { kind, .. } => kind,
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
struct HeartbeatPayload {
    #[serde(default)]
    timestamp: u64,
}

#[derive(Deserialize)]
struct ConnectedPayload {
    version: Option<String>,
}

/// Decodes one event-stream frame.
pub fn decode(text: &str) -> Result<DaemonEvent, FrameError> {
    let envelope: Envelope = serde_json::from_str(text)?;
    let kind = envelope.kind.ok_or(FrameError::MissingType)?;
    let payload = envelope.payload;
    let event = match kind.as_str() {
        "state" => DaemonEvent::State(serde_json::from_value(payload)?),
        "event" => DaemonEvent::KeyEvent(serde_json::from_value(payload)?),
        "latency" => DaemonEvent::Latency(serde_json::from_value(payload)?),
        "heartbeat" => {
            let heartbeat: HeartbeatPayload = serde_json::from_value(payload)?;
            DaemonEvent::Heartbeat {
                timestamp: heartbeat.timestamp,
            }
        }
        "connected" => {
            let connected: ConnectedPayload =
                serde_json::from_value(payload).unwrap_or(ConnectedPayload { version: None });
            DaemonEvent::Connected {
                version: connected.version,
            }
        }
        _ => DaemonEvent::Other { kind, payload },
    };
    Ok(event)
}

/// Decoded daemon events, fanned out to any number of subscribers.
pub struct EventStream {
    connection: ConnectionManager,
    events: broadcast::Sender<DaemonEvent>,
    listener: ListenerId,
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("connection", &self.connection)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventStream {
    /// Attaches to `connection`. Does not connect.
    pub fn new(connection: ConnectionManager) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let sender = events.clone();
        let listener = connection.on_message(move |text| match decode(text) {
            Ok(event) => {
                // no subscribers is fine
                let _ = sender.send(event);
            }
            Err(err) => tracing::warn!(error = %err, "dropping malformed event frame"),
        });
        Self {
            connection,
            events,
            listener,
        }
    }

    /// Builds a WebSocket stream for `config.events`. Does not connect.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(ConnectionManager::websocket(config.events.clone()))
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Receives every event decoded from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DaemonEvent> {
        self.events.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.connection.remove_listener(self.listener);
    }
}
