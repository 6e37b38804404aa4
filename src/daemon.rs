//! High-level client for the keyrx daemon.
//!
//! [`DaemonClient`] wires a connection, a correlator and an invalidation
//! coordinator together and owns the two restart-class call sites.

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::ClientConfig;
use crate::connection::{ConnectionError, ConnectionManager, Connector, WebSocketConnector};
use crate::invalidation::{CacheInvalidator, InvalidationCoordinator, InvalidationTask};
use crate::rpc::{RpcClient, RpcClientError};

/// Answer to `restart_daemon`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RestartResult {
    pub success: bool,
    pub message: String,
}

/// Answer to `activate_profile`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ActivationResult {
    pub success: bool,
    pub compile_time_ms: u64,
    pub reload_time_ms: u64,
    pub error: Option<String>,
}

/// A successful restart together with the invalidation it armed.
#[derive(Debug)]
pub struct RestartOutcome {
    pub result: RestartResult,
    pub invalidation: InvalidationTask,
}

#[derive(Debug, Clone)]
pub struct DaemonClient {
    rpc: RpcClient,
    invalidation: InvalidationCoordinator,
}

impl DaemonClient {
    pub fn new(rpc: RpcClient, invalidation: InvalidationCoordinator) -> Self {
        Self { rpc, invalidation }
    }

    /// Builds a WebSocket client from `config`. Does not connect.
    pub fn from_config(config: &ClientConfig, invalidator: impl CacheInvalidator) -> Self {
        Self::with_connector(config, Arc::new(WebSocketConnector), invalidator)
    }

    pub fn with_connector(
        config: &ClientConfig,
        connector: Arc<dyn Connector>,
        invalidator: impl CacheInvalidator,
    ) -> Self {
        let connection = ConnectionManager::new(config.rpc.clone(), connector);
        let rpc = RpcClient::new(connection, config.default_timeout);
        let invalidation = InvalidationCoordinator::new(invalidator, config.restart_delay);
        Self::new(rpc, invalidation)
    }

    /// Builds from `config` and waits for the first connect attempt.
    pub async fn connect(
        config: &ClientConfig,
        invalidator: impl CacheInvalidator,
    ) -> Result<Self, ConnectionError> {
        let client = Self::from_config(config, invalidator);
        client.connection().connect().await?;
        Ok(client)
    }

    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    pub fn connection(&self) -> &ConnectionManager {
        self.rpc.connection()
    }

    pub fn invalidation(&self) -> &InvalidationCoordinator {
        &self.invalidation
    }

    /// Restarts the daemon process.
    ///
    /// The daemon answers before it goes down, so the connection is expected
    /// to drop shortly after this returns. On success an invalidate-all is
    /// armed for once the daemon has had time to come back.
    pub async fn restart_daemon(&self) -> Result<RestartOutcome, RpcClientError> {
        let response = self.rpc.call("restart_daemon", json!({}), None).await;
        let (value, invalidation) = self.invalidation.after_restart(response)?;
        let result = decode_result::<RestartResult>("restart_daemon", value)?;
        tracing::info!(message = %result.message, "daemon restart requested");
        Ok(RestartOutcome {
            result,
            invalidation,
        })
    }

    /// Activates `name` and restarts the daemon so it takes effect.
    ///
    /// A failed activation, whether an error frame or a result with
    /// `success: false`, skips the restart and arms nothing.
    pub async fn activate_profile_and_restart(
        &self,
        name: &str,
    ) -> Result<RestartOutcome, RpcClientError> {
        let value = self
            .rpc
            .call("activate_profile", json!({ "name": name }), None)
            .await?;
        let activation = decode_result::<ActivationResult>("activate_profile", value)?;
        if !activation.success {
            let reason = activation
                .error
                .unwrap_or_else(|| "activation failed".to_string());
            tracing::warn!(profile = name, %reason, "profile activation rejected; not restarting");
            return Err(RpcClientError::Rejected {
                method: "activate_profile".to_string(),
                reason,
            });
        }
        tracing::debug!(
            profile = name,
            compile_ms = activation.compile_time_ms,
            reload_ms = activation.reload_time_ms,
            "profile activated"
        );
        self.restart_daemon().await
    }

    /// Closes the RPC connection.
    pub async fn close(&self) {
        self.connection().close().await;
    }
}

fn decode_result<T: serde::de::DeserializeOwned + Default>(
    method: &str,
    value: Value,
) -> Result<T, RpcClientError> {
    if value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(value).map_err(|source| RpcClientError::Decode {
        method: method.to_string(),
        source,
    })
}
