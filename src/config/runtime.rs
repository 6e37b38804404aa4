//! Resolved runtime configuration.
//!
//! [`ClientConfig`] is what the client actually runs with: durations parsed,
//! endpoints validated and environment overrides applied on top of the TOML
//! file.

use std::time::Duration;

use crate::config::error::ConfigError;
use crate::config::schema::{Config, LogLevel, DEFAULT_EVENTS_URL, DEFAULT_RPC_URL};
use crate::connection::{ConnectionOptions, ReconnectPolicy};
use crate::invalidation::DEFAULT_RESTART_DELAY;
use crate::rpc::DEFAULT_CALL_TIMEOUT;

/// Overrides `connection.rpc_url`.
pub const RPC_URL_ENV: &str = "KEYRX_RPC_URL";
/// Overrides `connection.events_url`.
pub const EVENTS_URL_ENV: &str = "KEYRX_EVENTS_URL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub rpc: ConnectionOptions,
    pub events: ConnectionOptions,
    pub default_timeout: Duration,
    pub restart_delay: Duration,
    pub log_level: LogLevel,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            rpc: ConnectionOptions::new(DEFAULT_RPC_URL),
            events: ConnectionOptions::new(DEFAULT_EVENTS_URL),
            default_timeout: DEFAULT_CALL_TIMEOUT,
            restart_delay: DEFAULT_RESTART_DELAY,
            log_level: LogLevel::default(),
        }
    }
}

impl ClientConfig {
    /// Resolves `config` and applies `KEYRX_RPC_URL` / `KEYRX_EVENTS_URL`.
    pub fn resolve(config: &Config) -> Result<Self, ConfigError> {
        let mut resolved = Self::from_file_config(config)?;
        if let Some(url) = env_override(RPC_URL_ENV) {
            resolved.set_rpc_url(url)?;
        }
        if let Some(url) = env_override(EVENTS_URL_ENV) {
            resolved.set_events_url(url)?;
        }
        Ok(resolved)
    }

    /// Resolves `config` alone, ignoring the environment.
    pub fn from_file_config(config: &Config) -> Result<Self, ConfigError> {
        let reconnect = &config.connection.reconnect;
        let policy = ReconnectPolicy {
            base_delay: parse_duration("connection.reconnect.base_delay", &reconnect.base_delay)?,
            max_delay: parse_duration("connection.reconnect.max_delay", &reconnect.max_delay)?,
            max_attempts: reconnect.max_attempts,
        };
        let connect_timeout =
            parse_duration("connection.connect_timeout", &config.connection.connect_timeout)?;

        let options = |field: &'static str, url: &str| -> Result<ConnectionOptions, ConfigError> {
            Ok(ConnectionOptions {
                endpoint: validate_endpoint(field, url)?,
                connect_timeout,
                reconnect: policy.clone(),
            })
        };

        Ok(Self {
            rpc: options("connection.rpc_url", &config.connection.rpc_url)?,
            events: options("connection.events_url", &config.connection.events_url)?,
            default_timeout: parse_duration("rpc.default_timeout", &config.rpc.default_timeout)?,
            restart_delay: parse_duration(
                "invalidation.restart_delay",
                &config.invalidation.restart_delay,
            )?,
            log_level: config.logging.level,
        })
    }

    pub fn set_rpc_url(&mut self, url: impl Into<String>) -> Result<(), ConfigError> {
        self.rpc.endpoint = validate_endpoint("connection.rpc_url", &url.into())?;
        Ok(())
    }

    pub fn set_events_url(&mut self, url: impl Into<String>) -> Result<(), ConfigError> {
        self.events.endpoint = validate_endpoint("connection.events_url", &url.into())?;
        Ok(())
    }
}

fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_duration(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|e| ConfigError::InvalidDuration {
        field,
        value: value.to_string(),
        message: e.to_string(),
    })
}

fn validate_endpoint(field: &'static str, value: &str) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    let has_host = trimmed
        .strip_prefix("ws://")
        .or_else(|| trimmed.strip_prefix("wss://"))
        .is_some_and(|rest| !rest.is_empty());
    if has_host {
        Ok(trimmed.to_string())
    } else {
        Err(ConfigError::InvalidEndpoint {
            field,
            value: value.to_string(),
        })
    }
}
