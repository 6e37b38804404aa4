//! TOML configuration schema types for keyrx-client.
//!
//! All structs derive `Deserialize` and `Serialize` with defaults via
//! `#[serde(default)]`, so a partial file only overrides what it names.
//!
//! Duration fields use human-readable strings (e.g. `"5s"`, `"250ms"`)
//! parsed by the `humantime` crate when the config is resolved.

use serde::{Deserialize, Serialize};

/// Default RPC endpoint of a locally running daemon.
pub const DEFAULT_RPC_URL: &str = "ws://127.0.0.1:9867/ws-rpc";
/// Default event stream endpoint of a locally running daemon.
pub const DEFAULT_EVENTS_URL: &str = "ws://127.0.0.1:9867/ws";

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration encompassing all sections.
///
/// ```toml
/// [connection]
/// [connection.reconnect]
/// [rpc]
/// [invalidation]
/// [logging]
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub rpc: RpcConfig,
    pub invalidation: InvalidationConfig,
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Where the daemon listens and how hard to try reaching it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// WebSocket URL of the RPC endpoint. Overridden by `KEYRX_RPC_URL`.
    pub rpc_url: String,
    /// WebSocket URL of the event stream. Overridden by `KEYRX_EVENTS_URL`.
    pub events_url: String,
    /// Bound on one connect attempt, handshake included.
    pub connect_timeout: String,
    pub reconnect: ReconnectConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            events_url: DEFAULT_EVENTS_URL.to_string(),
            connect_timeout: "5s".to_string(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Backoff between reconnect attempts.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ReconnectConfig {
    /// First delay after a drop; doubles on every failed attempt.
    pub base_delay: String,
    /// Ceiling for any single delay.
    pub max_delay: String,
    /// Consecutive failed attempts before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: "250ms".to_string(),
            max_delay: "5s".to_string(),
            max_attempts: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// RPC
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RpcConfig {
    /// Timeout for calls that do not specify their own.
    pub default_timeout: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            default_timeout: "30s".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Invalidation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct InvalidationConfig {
    /// Wait between a successful restart-class call and invalidate-all.
    pub restart_delay: String,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            restart_delay: "2s".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Verbosity when `KEYRX_LOG` is not set.
    pub level: LogLevel,
}

/// Log verbosity levels (kebab-case in TOML).
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
