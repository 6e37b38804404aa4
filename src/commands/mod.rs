//! Command implementations for the keyrx-rpc CLI.
//!
//! - `config` - Configuration file management (init, path, validate)
//! - `rpc` - One-off calls and the restart-class commands
//! - `watch` - Live view of connection state and daemon events

pub(crate) mod config;
pub(crate) mod rpc;
pub(crate) mod watch;

pub(crate) use config::*;
pub(crate) use rpc::*;
pub(crate) use watch::*;

use keyrx_client::{ClientConfig, ConfigError};
use keyrx_client::config::ConfigLoader;
use std::path::Path;

/// Loads the config file and layers environment and flag overrides on top.
///
/// Precedence, lowest first: file, `KEYRX_RPC_URL` / `KEYRX_EVENTS_URL`,
/// `--rpc-url` / `--events-url`.
pub(crate) fn resolve_config(
    path: Option<&Path>,
    rpc_url: Option<&str>,
    events_url: Option<&str>,
) -> Result<ClientConfig, ConfigError> {
    let file = ConfigLoader::load(path)?;
    let mut config = ClientConfig::resolve(&file)?;
    if let Some(url) = rpc_url {
        config.set_rpc_url(url)?;
    }
    if let Some(url) = events_url {
        config.set_events_url(url)?;
    }
    Ok(config)
}
