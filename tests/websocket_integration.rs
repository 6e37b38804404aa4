//! Integration tests against a local WebSocket server.
//!
//! The server side speaks the daemon's JSON framing over a real
//! tokio-tungstenite socket, so these tests exercise the handshake, the
//! writer/reader tasks and reconnecting after the peer goes away.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use keyrx_client::{
    ConnectionError, ConnectionEvent, ConnectionManager, ConnectionOptions, ConnectionState,
    DaemonEvent, EventStream, ReconnectPolicy, RpcClient,
};

const WAIT: Duration = Duration::from_secs(5);

fn options(addr: std::net::SocketAddr, path: &str) -> ConnectionOptions {
    ConnectionOptions {
        endpoint: format!("ws://{addr}{path}"),
        connect_timeout: Duration::from_secs(2),
        reconnect: ReconnectPolicy {
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(200),
            max_attempts: 3,
        },
    }
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = timeout(WAIT, listener.accept())
        .await
        .expect("client should connect")
        .expect("accept failed");
    tokio_tungstenite::accept_async(stream)
        .await
        .expect("websocket handshake")
}

async fn next_request(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("client should send a frame")
            .expect("stream open")
            .expect("valid message");
        if msg.is_text() {
            return serde_json::from_str(msg.to_text().expect("utf8")).expect("json frame");
        }
    }
}

async fn send(ws: &mut WebSocketStream<TcpStream>, frame: Value) {
    ws.send(Message::text(frame.to_string()))
        .await
        .expect("server send");
}

fn record_events(connection: &ConnectionManager) -> Arc<Mutex<Vec<ConnectionEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    connection.on_state_change(move |event| {
        sink.lock().unwrap().push(event.clone());
    });
    events
}

#[tokio::test]
async fn test_call_round_trip_over_websocket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        send(&mut ws, json!({"type": "connected", "version": "0.1.0", "timestamp": 1})).await;
        let request = next_request(&mut ws).await;
        assert_eq!(request["type"], "command");
        assert_eq!(request["method"], "getX");
        send(
            &mut ws,
            json!({"type": "response", "id": request["id"], "result": {"x": request["params"]["a"]}}),
        )
        .await;
        // hold the socket until the client closes it
        while let Some(Ok(_)) = ws.next().await {}
    });

    let client = RpcClient::new(
        ConnectionManager::websocket(options(addr, "/ws-rpc")),
        Duration::from_secs(5),
    );
    client.connection().connect().await.expect("connect");
    assert_eq!(client.connection().state(), ConnectionState::Connected);

    let result = client
        .call("getX", json!({"a": 1}), None)
        .await
        .expect("call succeeds");
    assert_eq!(result, json!({"x": 1}));

    client.connection().close().await;
    assert_eq!(client.connection().state(), ConnectionState::Disconnected);
    timeout(WAIT, server).await.expect("server finishes").expect("server task");
}

#[tokio::test]
async fn test_server_drop_fails_pending_and_reconnects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    let server = tokio::spawn(async move {
        // first connection: swallow one request, then go away
        let mut ws = accept(&listener).await;
        let request = next_request(&mut ws).await;
        seen_tx.send(request).expect("test alive");
        drop(ws);

        // second connection: answer normally
        let mut ws = accept(&listener).await;
        let request = next_request(&mut ws).await;
        send(&mut ws, json!({"type": "response", "id": request["id"], "result": "pong"})).await;
        while let Some(Ok(_)) = ws.next().await {}
    });

    let client = RpcClient::new(
        ConnectionManager::websocket(options(addr, "/ws-rpc")),
        Duration::from_secs(5),
    );
    let events = record_events(client.connection());
    client.connection().connect().await.expect("connect");

    let lost = client.call("slow", json!({}), None).await;
    let swallowed = seen_rx.recv().await.expect("server saw the request");
    assert_eq!(swallowed["method"], "slow");
    let err = lost.expect_err("pending call fails on drop");
    assert!(err.is_connection_lost(), "got: {err}");

    timeout(WAIT, async {
        while client.connection().state() != ConnectionState::Connected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("client reconnects");

    let result = client.call("ping", json!({}), None).await.expect("call");
    assert_eq!(result, json!("pong"));

    let transitions: Vec<_> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            ConnectionEvent::StateChanged { to, .. } => Some(*to),
            ConnectionEvent::ReconnectExhausted { .. } => None,
        })
        .collect();
    assert_eq!(
        &transitions[..4],
        [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting,
            ConnectionState::Connecting,
        ]
    );
    assert_eq!(transitions.last(), Some(&ConnectionState::Connected));

    client.connection().close().await;
    timeout(WAIT, server).await.expect("server finishes").expect("server task");
}

#[tokio::test]
async fn test_unreachable_daemon_exhausts_attempts() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        listener.local_addr().expect("addr")
    };

    let connection = ConnectionManager::websocket(options(addr, "/ws-rpc"));
    let (exhausted_tx, mut exhausted_rx) = mpsc::unbounded_channel();
    connection.on_state_change(move |event| {
        if let ConnectionEvent::ReconnectExhausted { attempts, .. } = event {
            let _ = exhausted_tx.send(*attempts);
        }
    });

    let err = connection.connect().await.expect_err("nothing is listening");
    assert!(matches!(err, ConnectionError::Unreachable { .. }), "got: {err}");

    let attempts = timeout(WAIT, exhausted_rx.recv())
        .await
        .expect("gives up in time")
        .expect("notice delivered");
    assert_eq!(attempts, 3);
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_event_stream_over_websocket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        send(
            &mut ws,
            json!({"type": "connected", "payload": {"version": "0.1.0", "timestamp": 1}}),
        )
        .await;
        send(
            &mut ws,
            json!({"type": "state", "payload": {"modifiers": [], "locks": ["LK_00"], "layer": "nav"}}),
        )
        .await;
        while let Some(Ok(_)) = ws.next().await {}
    });

    let stream = EventStream::new(ConnectionManager::websocket(options(addr, "/ws")));
    let mut events = stream.subscribe();
    stream.connection().connect().await.expect("connect");

    let first = timeout(WAIT, events.recv()).await.expect("event").expect("open");
    assert_eq!(
        first,
        DaemonEvent::Connected {
            version: Some("0.1.0".to_string())
        }
    );
    match timeout(WAIT, events.recv()).await.expect("event").expect("open") {
        DaemonEvent::State(state) => {
            assert_eq!(state.layer, "nav");
            assert_eq!(state.locks, ["LK_00"]);
            assert_eq!(state.active_profile, None);
        }
        other => panic!("expected State, got: {other:?}"),
    }

    stream.connection().close().await;
    timeout(WAIT, server).await.expect("server finishes").expect("server task");
}
