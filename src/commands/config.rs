//! `config` subcommand implementations.

use keyrx_client::config::{default, xdg, ConfigLoader};
use keyrx_client::ClientConfig;
use std::path::Path;
use std::process::ExitCode;

pub(crate) fn run_config_init_command(force: bool) -> ExitCode {
    match default::create_default_config(force) {
        Ok(path) => {
            println!("Created configuration at {}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Config error: {e}");
            ExitCode::FAILURE
        }
    }
}

pub(crate) fn run_config_path_command() -> ExitCode {
    println!("{}", xdg::config_path().display());
    ExitCode::SUCCESS
}

/// Parses the file and resolves it the way the client would at startup.
pub(crate) fn run_config_validate_command(path: Option<&Path>) -> ExitCode {
    let resolved = ConfigLoader::load(path).and_then(|config| ClientConfig::resolve(&config));
    match resolved {
        Ok(config) => {
            println!("Configuration is valid");
            println!("{config:#?}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Config error: {e}");
            ExitCode::FAILURE
        }
    }
}
