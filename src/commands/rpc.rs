//! RPC command implementations.
//!
//! - `call` - Send one query or command and print the result
//! - `restart` - Restart the daemon
//! - `activate` - Activate a profile, then restart the daemon

use keyrx_client::{
    ClientConfig, ConnectionEvent, ConnectionManager, ConnectionState, DaemonClient,
    InvalidationScope, RestartOutcome, RpcClient, RpcClientError,
};
use serde_json::Value;
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::mpsc;

/// Upper bound on how long `--wait` waits for the daemon to come back.
const RESTART_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends one call and prints the result as pretty JSON on stdout.
pub(crate) async fn run_call_command(
    config: &ClientConfig,
    method: &str,
    params: Option<&str>,
    timeout: Option<Duration>,
    query: bool,
) -> ExitCode {
    let params = match params {
        Some(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(value) => value,
            Err(e) => {
                eprintln!("Error: params are not valid JSON: {e}");
                return ExitCode::from(2);
            }
        },
        None => Value::Object(Default::default()),
    };

    let client = RpcClient::new(
        ConnectionManager::websocket(config.rpc.clone()),
        config.default_timeout,
    );
    if let Err(e) = client.connection().connect().await {
        eprintln!("Error: {e}");
        client.connection().close().await;
        return ExitCode::FAILURE;
    }

    let result = if query {
        client.query(method, params, timeout).await
    } else {
        client.call(method, params, timeout).await
    };
    client.connection().close().await;

    match result {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(text) => {
                println!("{text}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: failed to render result: {e}");
                ExitCode::FAILURE
            }
        },
        Err(e) => report_call_error(&e),
    }
}

pub(crate) async fn run_restart_command(config: &ClientConfig, wait: bool) -> ExitCode {
    let Some(client) = connect_daemon(config).await else {
        return ExitCode::FAILURE;
    };
    let back_online = watch_for_reconnect(client.connection());

    let outcome = client.restart_daemon().await;
    finish_restart(&client, outcome, wait, back_online).await
}

pub(crate) async fn run_activate_command(
    config: &ClientConfig,
    profile: &str,
    wait: bool,
) -> ExitCode {
    let Some(client) = connect_daemon(config).await else {
        return ExitCode::FAILURE;
    };
    let back_online = watch_for_reconnect(client.connection());

    let outcome = client.activate_profile_and_restart(profile).await;
    if outcome.is_ok() {
        println!("Activated profile {profile}");
    }
    finish_restart(&client, outcome, wait, back_online).await
}

async fn connect_daemon(config: &ClientConfig) -> Option<DaemonClient> {
    let invalidator = |scope: &InvalidationScope| {
        tracing::info!(?scope, "daemon-derived data is stale");
    };
    match DaemonClient::connect(config, invalidator).await {
        Ok(client) => Some(client),
        Err(e) => {
            eprintln!("Error: {e}");
            None
        }
    }
}

async fn finish_restart(
    client: &DaemonClient,
    outcome: Result<RestartOutcome, RpcClientError>,
    wait: bool,
    back_online: mpsc::UnboundedReceiver<ConnectionEvent>,
) -> ExitCode {
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            client.close().await;
            return report_call_error(&e);
        }
    };

    if outcome.result.message.is_empty() {
        println!("Daemon restart requested");
    } else {
        println!("Daemon restart requested: {}", outcome.result.message);
    }

    let code = if wait {
        match tokio::time::timeout(RESTART_WAIT_TIMEOUT, wait_for_reconnect(back_online)).await {
            Ok(true) => {
                outcome.invalidation.wait().await;
                println!("Daemon is back");
                ExitCode::SUCCESS
            }
            Ok(false) => {
                eprintln!("Error: daemon did not come back");
                ExitCode::FAILURE
            }
            Err(_) => {
                eprintln!(
                    "Error: daemon not back after {}",
                    humantime::format_duration(RESTART_WAIT_TIMEOUT)
                );
                ExitCode::FAILURE
            }
        }
    } else {
        ExitCode::SUCCESS
    };
    client.close().await;
    code
}

/// Forwards connection events so a restart can be followed after the fact.
fn watch_for_reconnect(connection: &ConnectionManager) -> mpsc::UnboundedReceiver<ConnectionEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    connection.on_state_change(move |event| {
        let _ = tx.send(event.clone());
    });
    rx
}

/// Resolves `true` once the session has dropped and come back, `false` if
/// reconnecting was given up.
async fn wait_for_reconnect(mut events: mpsc::UnboundedReceiver<ConnectionEvent>) -> bool {
    let mut dropped = false;
    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::StateChanged {
                from: ConnectionState::Connected,
                ..
            } => dropped = true,
            ConnectionEvent::StateChanged {
                to: ConnectionState::Connected,
                ..
            } if dropped => return true,
            ConnectionEvent::ReconnectExhausted { .. } => return false,
            ConnectionEvent::StateChanged { .. } => {}
        }
    }
    false
}

fn report_call_error(err: &RpcClientError) -> ExitCode {
    eprintln!("Error: {err}");
    if let Some(rpc) = err.rpc_error() {
        if let Some(data) = &rpc.data {
            eprintln!("  data: {data}");
        }
    }
    ExitCode::FAILURE
}
