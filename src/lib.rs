//! keyrx-client: client side of the keyrx daemon's WebSocket API.
//!
//! - [`connection`] keeps one logical link to the daemon alive, reconnecting
//!   with bounded exponential backoff.
//! - [`rpc`] correlates requests with responses over that link and routes
//!   pushes to topic subscribers.
//! - [`invalidation`] tells the cache layer to refetch once a restarted
//!   daemon has had time to come back.
//! - [`daemon`] ties the three together for the restart-class calls.
//! - [`events`] decodes the daemon's monitoring stream.

pub mod config;
pub mod connection;
pub mod daemon;
pub mod events;
pub mod invalidation;
pub mod logging;
pub mod protocol;
pub mod rpc;

pub use config::{ClientConfig, Config, ConfigError};
pub use connection::{
    ConnectionError, ConnectionEvent, ConnectionManager, ConnectionOptions, ConnectionState,
    NotConnected, ReconnectPolicy,
};
pub use daemon::{ActivationResult, DaemonClient, RestartOutcome, RestartResult};
pub use events::{DaemonEvent, EventStream};
pub use invalidation::{
    CacheInvalidator, InvalidationCoordinator, InvalidationScope, InvalidationTask,
};
pub use protocol::{ErrorCode, RpcError};
pub use rpc::{RpcClient, RpcClientError, SubscriptionId};
