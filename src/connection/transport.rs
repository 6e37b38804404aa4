//! Byte-level links underneath the connection manager.
//!
//! A [`Connector`] opens one [`Transport`] per connect attempt. The
//! transport is a pair of text-frame channels: dropping it releases the
//! underlying socket, and the inbound side ending means the peer went away.

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};

/// Failure to open a transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Nothing accepted the connection (refused, DNS failure, ...).
    #[error("unreachable: {0}")]
    Unreachable(String),
    /// The peer answered but the protocol upgrade failed.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Io(io) => TransportError::Unreachable(io.to_string()),
            other => TransportError::Handshake(other.to_string()),
        }
    }
}

/// Opens transports to an endpoint.
pub trait Connector: Send + Sync + 'static {
    fn connect<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, Result<Transport, TransportError>>;
}

/// Outbound half of a transport.
#[derive(Debug, Clone)]
pub struct FrameSink(mpsc::UnboundedSender<String>);

impl FrameSink {
    /// Queues one text frame. Fails once the link has shut down.
    pub fn send(&self, frame: String) -> Result<(), String> {
        self.0.send(frame).map_err(|err| err.0)
    }
}

/// Inbound half of a transport.
#[derive(Debug)]
pub struct FrameStream(mpsc::UnboundedReceiver<String>);

impl FrameStream {
    /// Next inbound frame, or `None` once the peer has gone away.
    pub async fn recv(&mut self) -> Option<String> {
        self.0.recv().await
    }
}

/// An open link to the daemon.
#[derive(Debug)]
pub struct Transport {
    sink: FrameSink,
    stream: FrameStream,
}

impl Transport {
    pub fn new(outbound: mpsc::UnboundedSender<String>, inbound: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            sink: FrameSink(outbound),
            stream: FrameStream(inbound),
        }
    }

    pub fn split(self) -> (FrameSink, FrameStream) {
        (self.sink, self.stream)
    }
}

// ----------------------------------------------------------------------------
// WebSocket
// ----------------------------------------------------------------------------

/// Connects over WebSocket (`ws://` or `wss://` URLs).
///
/// Each transport runs two pump tasks: one forwarding queued frames to the
/// socket, one forwarding text frames from the socket. Dropping the
/// transport ends the writer, which closes the socket.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn connect<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, Result<Transport, TransportError>> {
        Box::pin(async move {
            let (socket, _response) = tokio_tungstenite::connect_async(endpoint).await?;
            let (mut ws_sink, mut ws_stream) = socket.split();
            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
            let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

            tokio::spawn(async move {
                while let Some(frame) = out_rx.recv().await {
                    if let Err(err) = ws_sink.send(Message::text(frame)).await {
                        tracing::debug!(error = %err, "websocket write failed");
                        break;
                    }
                }
                let _ = ws_sink.close().await;
            });

            tokio::spawn(async move {
                while let Some(message) = ws_stream.next().await {
                    let text = match message {
                        Ok(Message::Text(text)) => text.to_string(),
                        Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                            Ok(text) => text,
                            Err(_) => {
                                tracing::warn!("dropping non-UTF-8 binary frame");
                                continue;
                            }
                        },
                        Ok(Message::Close(_)) => break,
                        Ok(_) => continue,
                        Err(err) => {
                            tracing::debug!(error = %err, "websocket read failed");
                            break;
                        }
                    };
                    if in_tx.send(text).is_err() {
                        break;
                    }
                }
            });

            Ok(Transport::new(out_tx, in_rx))
        })
    }
}

// ----------------------------------------------------------------------------
// In-memory
// ----------------------------------------------------------------------------

/// In-process connector for driving a client without a network.
///
/// Every accepted connect hands a [`MemoryPeer`] to the paired
/// [`MemoryListener`]. Dropping the peer looks like the daemon going away.
#[derive(Clone)]
pub struct MemoryConnector {
    inner: Arc<Mutex<MemoryState>>,
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

struct MemoryState {
    accepting: bool,
    attempts: u32,
}

/// Receives the daemon side of each accepted in-memory connection.
pub struct MemoryListener(mpsc::UnboundedReceiver<MemoryPeer>);

impl MemoryListener {
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.0.recv().await
    }
}

/// The daemon side of one in-memory connection.
pub struct MemoryPeer {
    to_client: mpsc::UnboundedSender<String>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// Delivers a frame to the client. Returns `false` if the client is gone.
    pub fn send(&self, frame: impl Into<String>) -> bool {
        self.to_client.send(frame.into()).is_ok()
    }

    /// Next frame written by the client, or `None` once it released the link.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }
}

impl MemoryConnector {
    pub fn new() -> (Self, MemoryListener) {
        let (peers, listener) = mpsc::unbounded_channel();
        let connector = Self {
            inner: Arc::new(Mutex::new(MemoryState {
                accepting: true,
                attempts: 0,
            })),
            peers,
        };
        (connector, MemoryListener(listener))
    }

    /// While not accepting, connect attempts fail as unreachable.
    pub fn set_accepting(&self, accepting: bool) {
        self.lock().accepting = accepting;
    }

    /// Total connect attempts seen, successful or not.
    pub fn attempts(&self) -> u32 {
        self.lock().attempts
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Connector for MemoryConnector {
    fn connect<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, Result<Transport, TransportError>> {
        Box::pin(async move {
            let accepting = {
                let mut state = self.lock();
                state.attempts += 1;
                state.accepting
            };
            if !accepting {
                return Err(TransportError::Unreachable(format!(
                    "connection refused: {}",
                    endpoint
                )));
            }

            let (to_client, inbound) = mpsc::unbounded_channel();
            let (outbound, from_client) = mpsc::unbounded_channel();
            let peer = MemoryPeer {
                to_client,
                from_client,
            };
            self.peers
                .send(peer)
                .map_err(|_| TransportError::Unreachable("listener closed".to_string()))?;
            Ok(Transport::new(outbound, inbound))
        })
    }
}
