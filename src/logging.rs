//! Logging initialization for keyrx-client tools.
//!
//! Configures the `tracing` subscriber with level filtering via the
//! `KEYRX_LOG` environment variable, falling back to the configured level.
//!
//! ```bash
//! # Debug level
//! KEYRX_LOG=debug keyrx-rpc watch
//!
//! # Module-specific filtering
//! KEYRX_LOG=keyrx_client::connection=trace,warn keyrx-rpc restart --wait
//! ```

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogLevel;

/// Environment variable holding `EnvFilter` directives.
pub const LOG_ENV: &str = "KEYRX_LOG";

/// Builds the filter: `KEYRX_LOG` when set and valid, otherwise `level`.
pub fn filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Installs the global subscriber, writing to stderr.
///
/// Does nothing if a subscriber is already installed.
pub fn init(level: LogLevel) {
    let _ = fmt()
        .with_env_filter(filter(level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
