//! Error types for correlated calls.

use std::time::Duration;
use thiserror::Error;

use crate::connection::NotConnected;
use crate::protocol::RpcError;

/// Terminal failure of one call.
///
/// Every call ends in exactly one outcome: a result payload or one of
/// these variants.
#[derive(Debug, Error)]
pub enum RpcClientError {
    /// No response arrived before the deadline.
    #[error("`{method}` timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    /// The session left `Connected` while the call was pending.
    #[error("connection to daemon lost while `{method}` was pending")]
    ConnectionLost { method: String },

    /// The frame could not be handed to the transport.
    #[error(transparent)]
    NotConnected(#[from] NotConnected),

    /// The daemon answered with an explicit error.
    #[error("`{method}` failed: {source}")]
    Rpc {
        method: String,
        #[source]
        source: RpcError,
    },

    #[error("failed to encode `{method}` request")]
    Encode {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    /// The daemon answered with a result that reports failure.
    #[error("`{method}` was rejected by the daemon: {reason}")]
    Rejected { method: String, reason: String },

    /// The result payload did not have the expected shape.
    #[error("unexpected result from `{method}`")]
    Decode {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

impl RpcClientError {
    /// The daemon's error payload, for `Rpc` failures.
    pub fn rpc_error(&self) -> Option<&RpcError> {
        match self {
            RpcClientError::Rpc { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcClientError::Timeout { .. })
    }

    pub fn is_connection_lost(&self) -> bool {
        matches!(self, RpcClientError::ConnectionLost { .. })
    }
}
