//! keyrx-rpc - CLI entry point
//!
//! Talks to a running keyrx daemon over its WebSocket RPC endpoint: one-off
//! calls, restart-class commands and a live watch of connection state and
//! daemon events.

mod commands;

use clap::{Parser, Subcommand};
use keyrx_client::config::xdg;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// Client for the keyrx remapping daemon
#[derive(Parser)]
#[command(name = "keyrx-rpc")]
#[command(version, about = "Client for the keyrx remapping daemon")]
struct Cli {
    /// WebSocket RPC endpoint (overrides config file and KEYRX_RPC_URL)
    #[arg(long, global = true)]
    rpc_url: Option<String>,

    /// WebSocket event endpoint (overrides config file and KEYRX_EVENTS_URL)
    #[arg(long, global = true)]
    events_url: Option<String>,

    /// Configuration file (default: $XDG_CONFIG_HOME/keyrx-client/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Call an RPC method and print its result as JSON
    Call {
        /// Method name, e.g. get_profiles
        method: String,
        /// Parameters as a JSON value (default: {})
        params: Option<String>,
        /// Per-call timeout, e.g. 500ms or 10s
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,
        /// Send as a read-only query instead of a command
        #[arg(long)]
        query: bool,
    },

    /// Restart the daemon process
    Restart {
        /// Wait for the daemon to come back before exiting
        #[arg(long)]
        wait: bool,
    },

    /// Activate a profile and restart the daemon
    Activate {
        /// Profile name
        profile: String,
        /// Wait for the daemon to come back before exiting
        #[arg(long)]
        wait: bool,
    },

    /// Print connection changes and daemon events until interrupted
    Watch {
        /// Also subscribe to this RPC push channel (repeatable)
        #[arg(long = "rpc-topic")]
        rpc_topics: Vec<String>,
    },

    /// Manage configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Actions for the `config` subcommand.
#[derive(Subcommand)]
enum ConfigAction {
    /// Create default configuration file
    Init {
        /// Overwrite existing configuration (creates backup)
        #[arg(long)]
        force: bool,
    },
    /// Show configuration file path
    Path,
    /// Validate configuration file
    Validate,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .as_deref()
        .map(|path| xdg::expand_tilde(&path.to_string_lossy()));

    if let Commands::Config { action } = cli.command {
        return match action {
            ConfigAction::Init { force } => commands::run_config_init_command(force),
            ConfigAction::Path => commands::run_config_path_command(),
            ConfigAction::Validate => commands::run_config_validate_command(config_path.as_deref()),
        };
    }

    let config = match commands::resolve_config(
        config_path.as_deref(),
        cli.rpc_url.as_deref(),
        cli.events_url.as_deref(),
    ) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Config error: {e}");
            return ExitCode::FAILURE;
        }
    };
    keyrx_client::logging::init(config.log_level);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to start tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    rt.block_on(async move {
        match cli.command {
            Commands::Call {
                method,
                params,
                timeout,
                query,
            } => {
                commands::run_call_command(&config, &method, params.as_deref(), timeout, query)
                    .await
            }
            Commands::Restart { wait } => commands::run_restart_command(&config, wait).await,
            Commands::Activate { profile, wait } => {
                commands::run_activate_command(&config, &profile, wait).await
            }
            Commands::Watch { rpc_topics } => {
                commands::run_watch_command(&config, &rpc_topics).await
            }
            // handled before the runtime starts
            Commands::Config { .. } => ExitCode::SUCCESS,
        }
    })
}
