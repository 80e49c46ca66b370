//! End-to-end tests over real sockets: WebSocket relay, bridge fan-out and
//! the auxiliary HTTP routes.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use relay_bridge::{BridgeConfig, BridgeState, EventBridge, EventPublisher, MemoryBroker, MemoryUserStore};
use relay_gateway::{Gateway, GatewayConfig};
use relay_server::{build_router, AppState};

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Helper: start the server on a random port with an in-process broker.
async fn start_test_server() -> SocketAddr {
    start_test_server_with(GatewayConfig::default()).await
}

async fn start_test_server_with(config: GatewayConfig) -> SocketAddr {
    let broker = Arc::new(MemoryBroker::new());
    let gateway = Gateway::new(config);
    let publisher = EventPublisher::new(broker.clone(), "myChannel");

    let bridge = Arc::new(
        EventBridge::new(
            broker,
            BridgeConfig {
                channel: "myChannel".to_string(),
                ping_interval: Duration::from_secs(60),
            },
        )
        .with_sink(Arc::new(gateway.clone())),
    );
    let mut bridge_state = bridge.watch_state();

    let state = AppState::new(
        gateway,
        publisher,
        Arc::new(MemoryUserStore::new()),
        bridge.watch_state(),
    );

    tokio::spawn({
        let bridge = Arc::clone(&bridge);
        async move {
            let _ = bridge.run().await;
        }
    });
    tokio::time::timeout(
        Duration::from_secs(5),
        bridge_state.wait_for(|s| *s == BridgeState::Subscribed),
    )
    .await
    .expect("bridge did not subscribe")
    .unwrap();

    let app = build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

async fn connect(addr: SocketAddr, identity: &str) -> WsStream {
    let url = format!("ws://{}/ws/{}", addr, identity);
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("WebSocket connect failed");
    ws
}

/// Next text frame as JSON, or `None` if nothing arrives in time
async fn next_json(ws: &mut WsStream, wait: Duration) -> Option<Value> {
    loop {
        match tokio::time::timeout(wait, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                return Some(serde_json::from_str(&text).expect("server sent invalid JSON"))
            }
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            _ => return None,
        }
    }
}

async fn expect_json(ws: &mut WsStream) -> Value {
    next_json(ws, Duration::from_secs(2))
        .await
        .expect("expected a frame from the server")
}

/// Next close frame as (code, reason), skipping anything else
async fn expect_close(ws: &mut WsStream) -> (u16, String) {
    loop {
        match tokio::time::timeout(Duration::from_secs(2), ws.next()).await {
            Ok(Some(Ok(Message::Close(Some(frame))))) => {
                return (u16::from(frame.code), frame.reason.into_owned())
            }
            Ok(Some(Ok(Message::Close(None)))) => panic!("close frame without a code"),
            Ok(Some(Ok(_))) => continue,
            other => panic!("expected a close frame, got {:?}", other),
        }
    }
}

async fn health(addr: SocketAddr) -> Value {
    reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

/// Poll /health until `field` reaches `expected`
async fn wait_for_health(addr: SocketAddr, field: &str, expected: u64) -> Value {
    for _ in 0..40 {
        let value = health(addr).await;
        if value[field] == expected {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("{} never reached {}", field, expected);
}

#[tokio::test]
async fn test_welcome_on_connect() {
    let addr = start_test_server().await;
    let mut alice = connect(addr, "alice").await;

    let welcome = expect_json(&mut alice).await;
    assert_eq!(welcome["type"], "notify");
    let text = welcome["data"].as_str().unwrap();
    assert!(text.starts_with("Hello user: alice with UUID: "), "{}", text);
}

#[tokio::test]
async fn test_join_is_broadcast_to_peers() {
    let addr = start_test_server().await;
    let mut alice = connect(addr, "alice").await;
    expect_json(&mut alice).await;

    let mut bob = connect(addr, "bob").await;
    let welcome = expect_json(&mut bob).await;
    assert!(welcome["data"].as_str().unwrap().starts_with("Hello user: bob"));

    let join = expect_json(&mut alice).await;
    assert_eq!(join["type"], "notify");
    assert!(join["data"]
        .as_str()
        .unwrap()
        .starts_with("New user connected: bob and UUID: "));

    // the joining connection does not hear its own announcement
    assert!(next_json(&mut bob, Duration::from_millis(200)).await.is_none());
}

#[tokio::test]
async fn test_directed_message_reaches_only_target() {
    let addr = start_test_server().await;
    let mut alice = connect(addr, "alice").await;
    expect_json(&mut alice).await;
    let mut bob = connect(addr, "bob").await;
    expect_json(&mut bob).await;
    expect_json(&mut alice).await; // bob joined
    let mut carol = connect(addr, "carol").await;
    expect_json(&mut carol).await;
    expect_json(&mut alice).await; // carol joined
    expect_json(&mut bob).await; // carol joined

    let envelope = json!({"data": "hi bob", "from": "alice", "to": "bob"});
    alice
        .send(Message::Text(envelope.to_string()))
        .await
        .unwrap();

    assert_eq!(
        expect_json(&mut bob).await,
        json!({"data": "hi bob", "from": "alice", "to": "bob", "type": "message"})
    );
    assert!(next_json(&mut carol, Duration::from_millis(200)).await.is_none());
    assert!(next_json(&mut alice, Duration::from_millis(200)).await.is_none());
}

#[tokio::test]
async fn test_sender_cannot_spoof_from() {
    let addr = start_test_server().await;
    let mut bob = connect(addr, "bob").await;
    expect_json(&mut bob).await;
    let mut mallory = connect(addr, "mallory").await;
    expect_json(&mut mallory).await;
    expect_json(&mut bob).await; // mallory joined

    let envelope = json!({"data": "trust me", "from": "alice", "to": "bob"});
    mallory
        .send(Message::Binary(envelope.to_string().into_bytes()))
        .await
        .unwrap();

    let received = expect_json(&mut bob).await;
    assert_eq!(received["from"], "mallory");
    assert_eq!(received["data"], "trust me");
}

#[tokio::test]
async fn test_malformed_and_unknown_target_are_dropped() {
    let addr = start_test_server().await;
    let mut alice = connect(addr, "alice").await;
    expect_json(&mut alice).await;
    let mut bob = connect(addr, "bob").await;
    expect_json(&mut bob).await;
    expect_json(&mut alice).await;

    alice.send(Message::Text("not json".into())).await.unwrap();
    alice
        .send(Message::Text(json!({"data": "x", "to": "bob"}).to_string()))
        .await
        .unwrap();
    alice
        .send(Message::Text(
            json!({"data": "x", "from": "alice", "to": "nobody"}).to_string(),
        ))
        .await
        .unwrap();

    assert!(next_json(&mut bob, Duration::from_millis(300)).await.is_none());

    // connection still usable afterwards
    alice
        .send(Message::Text(
            json!({"data": "still here", "from": "alice", "to": "bob"}).to_string(),
        ))
        .await
        .unwrap();
    assert_eq!(expect_json(&mut bob).await["data"], "still here");
}

#[tokio::test]
async fn test_reconnect_replaces_and_late_close_keeps_new_mapping() {
    let addr = start_test_server().await;
    let mut first = connect(addr, "alice").await;
    expect_json(&mut first).await;
    let mut second = connect(addr, "alice").await;
    expect_json(&mut second).await;
    expect_json(&mut first).await; // join of the second alice

    first.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut bob = connect(addr, "bob").await;
    expect_json(&mut bob).await;
    expect_json(&mut second).await; // bob joined
    bob.send(Message::Text(
        json!({"data": "ping", "from": "bob", "to": "alice"}).to_string(),
    ))
    .await
    .unwrap();

    assert_eq!(expect_json(&mut second).await["data"], "ping");
}

#[tokio::test]
async fn test_plain_request_gets_upgrade_required() {
    let addr = start_test_server().await;

    let resp = reqwest::get(format!("http://{}/ws/alice", addr))
        .await
        .unwrap();

    assert_eq!(resp.status(), 426);
    assert_eq!(resp.text().await.unwrap(), "Upgrade Required");
}

#[tokio::test]
async fn test_root_and_health() {
    let addr = start_test_server().await;

    let root = reqwest::get(format!("http://{}/", addr)).await.unwrap();
    assert_eq!(root.text().await.unwrap(), "Hello, World 👋!");

    let mut alice = connect(addr, "alice").await;
    expect_json(&mut alice).await;

    let health: Value = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 1);
    assert_eq!(health["identities"], 1);
    assert_eq!(health["at_capacity"], false);
    assert_eq!(health["bridge"], "subscribed");
}

#[tokio::test]
async fn test_publish_is_fanned_out_to_connections() {
    let addr = start_test_server().await;
    let mut alice = connect(addr, "alice").await;
    expect_json(&mut alice).await;

    let resp = reqwest::get(format!("http://{}/publish", addr))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "published");

    assert_eq!(
        expect_json(&mut alice).await,
        json!({
            "type": "event",
            "channel": "myChannel",
            "data": [{"name": "Alice", "age": 1}, {"name": "Bas", "age": 18}]
        })
    );
}

#[tokio::test]
async fn test_user_data_write_and_read() {
    let addr = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{}/data/7", addr))
        .json(&json!({"name": "Alice", "age": 30}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.json::<Value>().await.unwrap(), json!({"message": "stored"}));

    let resp = client
        .get(format!("http://{}/data/7", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.json::<Value>().await.unwrap(),
        json!({"name": "Alice", "age": 30})
    );

    // POST /data writes id 1
    let resp = client
        .post(format!("http://{}/data", addr))
        .json(&json!({"name": "Bas", "age": 18}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let stored: Value = client
        .get(format!("http://{}/data/1", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stored["name"], "Bas");
}

#[tokio::test]
async fn test_user_data_errors() {
    let addr = start_test_server().await;
    let client = reqwest::Client::new();

    let missing = client
        .get(format!("http://{}/data/99", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
    assert_eq!(
        missing.json::<Value>().await.unwrap(),
        json!({"message": "data not found"})
    );

    let bad = client
        .post(format!("http://{}/data/3", addr))
        .header("content-type", "application/json")
        .body("{\"name\": 5}")
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 400);
    assert!(bad.json::<Value>().await.unwrap()["message"].is_string());
}

#[tokio::test]
async fn test_connection_over_capacity_is_refused_with_1013() {
    let addr = start_test_server_with(GatewayConfig {
        max_connections: 1,
        ..Default::default()
    })
    .await;
    let mut alice = connect(addr, "alice").await;
    expect_json(&mut alice).await;

    let mut bob = connect(addr, "bob").await;
    let (code, reason) = expect_close(&mut bob).await;
    assert_eq!(code, 1013);
    assert_eq!(reason, "Server at capacity (1 connections)");

    // the refused socket never reached the registry
    let status = health(addr).await;
    assert_eq!(status["identities"], 1);
    assert_eq!(status["reserved"], 1);
    assert_eq!(status["at_capacity"], true);
    assert!(next_json(&mut alice, Duration::from_millis(200)).await.is_none());

    // the slot comes back once alice leaves
    alice.close(None).await.unwrap();
    wait_for_health(addr, "connections", 0).await;
    let mut carol = None;
    for _ in 0..20 {
        let mut ws = connect(addr, "carol").await;
        if let Some(welcome) = next_json(&mut ws, Duration::from_millis(500)).await {
            carol = Some(welcome);
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let welcome = carol.expect("carol was never admitted");
    assert!(welcome["data"].as_str().unwrap().starts_with("Hello user: carol"));
}

#[tokio::test]
async fn test_server_initiated_close() {
    let addr = start_test_server().await;
    let mut alice = connect(addr, "alice").await;
    expect_json(&mut alice).await;
    assert_eq!(health(addr).await["identities"], 1);

    let client = reqwest::Client::new();
    let resp = client
        .delete(format!("http://{}/connections/alice", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let (code, reason) = expect_close(&mut alice).await;
    assert_eq!(code, 1000);
    assert_eq!(reason, "closed by server");

    let status = wait_for_health(addr, "identities", 0).await;
    assert_eq!(status["connections"], 0);

    // nothing left to close
    let resp = client
        .delete(format!("http://{}/connections/alice", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    assert_eq!(
        resp.json::<Value>().await.unwrap(),
        json!({"message": "not connected: alice"})
    );
}
