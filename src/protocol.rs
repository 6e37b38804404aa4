//! Wire types for the daemon's WebSocket RPC protocol.
//!
//! Every frame is a JSON text message discriminated by its `type` field.
//! Outbound frames are [`ClientFrame`]s. Inbound text decodes into
//! [`InboundFrame`], which keeps correlated responses and id-less push
//! events as structurally distinct variants.
//!
//! ```text
//! -> {"type":"command","id":"7","method":"restart_daemon","params":{}}
//! <- {"type":"response","id":"7","result":{"success":true,"message":"..."}}
//! <- {"type":"event","channel":"daemon-state","data":{...}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// JSON-RPC "method not found" code used by the daemon.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC "invalid params" code used by the daemon.
pub const INVALID_PARAMS: i64 = -32602;
/// JSON-RPC "internal error" code used by the daemon.
pub const INTERNAL_ERROR: i64 = -32603;

/// Frames sent from the client to the daemon.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Read-only request.
    Query {
        id: String,
        method: String,
        params: Value,
    },
    /// State-changing request.
    Command {
        id: String,
        method: String,
        params: Value,
    },
    /// Ask the daemon to push events published on `channel`.
    Subscribe { id: String, channel: String },
    /// Stop pushing events published on `channel`.
    Unsubscribe { id: String, channel: String },
}

impl ClientFrame {
    /// Correlation id carried by this frame.
    pub fn id(&self) -> &str {
        match self {
            ClientFrame::Query { id, .. }
            | ClientFrame::Command { id, .. }
            | ClientFrame::Subscribe { id, .. }
            | ClientFrame::Unsubscribe { id, .. } => id,
        }
    }

    /// Serializes the frame to the JSON text sent on the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Whether a request reads daemon state or changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Query,
    Command,
}

impl RequestKind {
    /// Builds the request frame for this kind.
    pub fn frame(self, id: String, method: String, params: Value) -> ClientFrame {
        match self {
            RequestKind::Query => ClientFrame::Query { id, method, params },
            RequestKind::Command => ClientFrame::Command { id, method, params },
        }
    }
}

/// Error code reported by the daemon.
///
/// The daemon's own handlers use numeric JSON-RPC codes, while some
/// services report symbolic codes such as `"NOT_FOUND"`. Both are kept
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    Numeric(i64),
    Named(String),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Numeric(code) => write!(f, "{}", code),
            ErrorCode::Named(code) => f.write_str(code),
        }
    }
}

impl PartialEq<&str> for ErrorCode {
    fn eq(&self, other: &&str) -> bool {
        matches!(self, ErrorCode::Named(code) if code == other)
    }
}

impl PartialEq<i64> for ErrorCode {
    fn eq(&self, other: &i64) -> bool {
        matches!(self, ErrorCode::Numeric(code) if code == other)
    }
}

/// Explicit error payload returned by the daemon for a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{message} (code {code})")]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Answer to the request carrying the same correlation id.
    Response {
        id: String,
        outcome: Result<Value, RpcError>,
    },
    /// Unsolicited event published on `topic`.
    Push { topic: String, payload: Value },
    /// Greeting sent by the daemon right after the socket opens.
    Handshake { version: Option<String> },
}

/// Failure to decode an inbound frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame has no `type` field")]
    MissingType,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ServerMessage {
    Response {
        id: String,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<RpcError>,
    },
    Event {
        channel: String,
        #[serde(default)]
        data: Value,
    },
    Connected {
        #[serde(default)]
        version: Option<String>,
        #[serde(default)]
        payload: Option<Value>,
    },
}

/// `{type, payload}` frames whose `type` names the topic directly.
#[derive(Debug, Deserialize)]
struct TopicMessage {
    #[serde(rename = "type")]
    topic: String,
    #[serde(default)]
    payload: Value,
}

impl From<ServerMessage> for InboundFrame {
    fn from(message: ServerMessage) -> Self {
        match message {
            ServerMessage::Response { id, error: Some(error), .. } => InboundFrame::Response {
                id,
                outcome: Err(error),
            },
            ServerMessage::Response { id, result, .. } => InboundFrame::Response {
                id,
                outcome: Ok(result.unwrap_or(Value::Null)),
            },
            ServerMessage::Event { channel, data } => InboundFrame::Push {
                topic: channel,
                payload: data,
            },
            ServerMessage::Connected { version, payload } => {
                let version = version.or_else(|| {
                    payload
                        .as_ref()
                        .and_then(|p| p.get("version"))
                        .and_then(Value::as_str)
                        .map(str::to_owned)
                });
                InboundFrame::Handshake { version }
            }
        }
    }
}

/// Decodes one inbound text frame.
///
/// `response`, `event` and `connected` frames follow the daemon's RPC
/// envelope; any other `type` is treated as a `{type, payload}` push whose
/// type is the topic.
pub fn decode(text: &str) -> Result<InboundFrame, FrameError> {
    let value: Value = serde_json::from_str(text)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingType)?;
    match kind {
        "response" | "event" | "connected" => {
            let message: ServerMessage = serde_json::from_value(value)?;
            Ok(message.into())
        }
        _ => {
            let message: TopicMessage = serde_json::from_value(value)?;
            Ok(InboundFrame::Push {
                topic: message.topic,
                payload: message.payload,
            })
        }
    }
}
