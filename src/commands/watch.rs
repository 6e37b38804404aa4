//! `watch` command: a live view of the daemon.

use keyrx_client::{
    ClientConfig, ConnectionEvent, ConnectionManager, DaemonEvent, EventStream, RpcClient,
};
use std::process::ExitCode;
use tokio::sync::{broadcast, mpsc};

/// Prints connection transitions, event-stream events and RPC pushes on
/// `rpc_topics` until Ctrl+C or until either link gives up reconnecting.
pub(crate) async fn run_watch_command(config: &ClientConfig, rpc_topics: &[String]) -> ExitCode {
    let (exhausted_tx, mut exhausted) = mpsc::unbounded_channel();

    let stream = EventStream::from_config(config);
    report_state(stream.connection(), "events", exhausted_tx.clone());
    let mut events = stream.subscribe();
    if let Err(e) = stream.connection().connect().await {
        tracing::warn!(error = %e, "event stream not reachable yet, retrying");
    }

    let rpc = if rpc_topics.is_empty() {
        None
    } else {
        let client = RpcClient::new(
            ConnectionManager::websocket(config.rpc.clone()),
            config.default_timeout,
        );
        report_state(client.connection(), "rpc", exhausted_tx.clone());
        for topic in rpc_topics {
            let name = topic.clone();
            client.subscribe(topic.clone(), move |payload| {
                println!("[rpc:{name}] {payload}");
            });
        }
        if let Err(e) = client.connection().connect().await {
            tracing::warn!(error = %e, "rpc endpoint not reachable yet, retrying");
        }
        Some(client)
    };
    drop(exhausted_tx);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let code = loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => print_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "watch output fell behind, events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break ExitCode::SUCCESS,
            },
            Some(link) = exhausted.recv() => {
                eprintln!("Error: gave up reconnecting to the daemon ({link})");
                break ExitCode::FAILURE;
            }
            _ = &mut ctrl_c => break ExitCode::SUCCESS,
        }
    };

    stream.connection().close().await;
    if let Some(client) = rpc {
        client.connection().close().await;
    }
    code
}

fn report_state(
    connection: &ConnectionManager,
    link: &'static str,
    exhausted: mpsc::UnboundedSender<&'static str>,
) {
    connection.on_state_change(move |event| match event {
        ConnectionEvent::StateChanged { from, to } => println!("[{link}] {from} -> {to}"),
        ConnectionEvent::ReconnectExhausted {
            attempts,
            last_error,
        } => {
            println!(
                "[{link}] gave up after {attempts} attempts: {}",
                last_error.as_deref().unwrap_or("unknown error")
            );
            let _ = exhausted.send(link);
        }
    });
}

fn print_event(event: &DaemonEvent) {
    match event {
        DaemonEvent::State(state) => println!(
            "[state] layer={} modifiers={:?} locks={:?} profile={}",
            state.layer,
            state.modifiers,
            state.locks,
            state.active_profile.as_deref().unwrap_or("-")
        ),
        DaemonEvent::KeyEvent(key) => println!(
            "[key] {} {} {} -> {} ({}us)",
            key.event_type, key.key_code, key.input, key.output, key.latency
        ),
        DaemonEvent::Latency(stats) => println!(
            "[latency] min={} avg={} max={} p95={} p99={}",
            stats.min, stats.avg, stats.max, stats.p95, stats.p99
        ),
        DaemonEvent::Heartbeat { timestamp } => println!("[heartbeat] {timestamp}"),
        DaemonEvent::Connected { version } => {
            println!("[connected] daemon {}", version.as_deref().unwrap_or("unknown"))
        }
        DaemonEvent::Other { kind, payload } => println!("[{kind}] {payload}"),
    }
}
