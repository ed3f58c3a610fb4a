#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use floor_gateway::auth::JwtVerifier;
use floor_gateway::config::{Config, RealtimeConfig};
use floor_gateway::data::NoDataSource;
use floor_gateway::realtime::RealtimeHub;
use floor_gateway::AppState;

pub const TEST_SECRET: &str = "floor-gateway-test-secret";
pub const OPERATOR_ROLE: &str = "operator";

pub type TestSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub fn test_config(realtime: RealtimeConfig) -> Config {
    Config {
        jwt_secret: TEST_SECRET.to_string(),
        allowed_roles: vec![OPERATOR_ROLE.to_string(), "supervisor".to_string()],
        port: 0,
        worker_id: 1,
        realtime,
    }
}

pub fn test_state(realtime: RealtimeConfig) -> AppState {
    let config = test_config(realtime);
    let hub = Arc::new(RealtimeHub::new(config.realtime.clone(), config.worker_id));
    AppState {
        verifier: Arc::new(JwtVerifier::new(TEST_SECRET, config.allowed_roles.clone())),
        hub,
        data: Arc::new(NoDataSource),
        config: Arc::new(config),
    }
}

/// Start an actual TCP server with a running hub.
/// Returns (addr, state). The server runs in the background.
pub async fn start_server(realtime: RealtimeConfig) -> (SocketAddr, AppState) {
    let state = test_state(realtime);
    state.hub.start();
    let app = floor_gateway::routes::router().with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

/// Mint a bearer token signed with the test secret.
pub fn mint_token(user_id: &str, roles: &[&str]) -> String {
    JwtVerifier::new(TEST_SECRET, Vec::new())
        .issue(user_id, roles, 300)
        .expect("mint test token")
}

/// Open a socket with `?token=` and return it without reading anything.
pub async fn open(addr: SocketAddr, token: &str) -> TestSocket {
    let url = format!("ws://{addr}/ws?token={token}");
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");
    ws
}

/// Connect as an operator and consume `connection_established`.
/// Returns the socket and the connection id.
pub async fn connect(addr: SocketAddr, user_id: &str) -> (TestSocket, String) {
    let mut ws = open(addr, &mint_token(user_id, &[OPERATOR_ROLE])).await;
    let hello = recv_json(&mut ws).await;
    assert_eq!(hello["type"], "connection_established");
    let id = hello["data"]["connection_id"]
        .as_str()
        .expect("connection_id present")
        .to_string();
    (ws, id)
}

pub async fn send_json(ws: &mut TestSocket, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("ws send");
}

/// Next text frame as JSON, skipping control frames.
pub async fn recv_json(ws: &mut TestSocket) -> Value {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for frame")
            .expect("stream ended")
            .expect("ws read error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).expect("parse frame"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Assert that no text frame arrives within `wait`.
pub async fn assert_silent(ws: &mut TestSocket, wait: Duration) {
    if let Ok(Some(Ok(Message::Text(text)))) = time::timeout(wait, ws.next()).await {
        panic!("unexpected frame: {text}");
    }
}

/// Read until the server closes and return the close code.
pub async fn expect_close(ws: &mut TestSocket) -> u16 {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for close");
        match msg {
            Some(Ok(Message::Close(Some(frame)))) => return u16::from(frame.code),
            Some(Ok(Message::Close(None))) | None => panic!("closed without a code"),
            Some(Ok(_)) => continue,
            Some(Err(e)) => panic!("ws error before close: {e}"),
        }
    }
}
