mod common;

use std::time::Duration;

use futures_util::SinkExt;
use serde_json::json;
use tokio::time;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

use floor_gateway::config::RealtimeConfig;
use floor_gateway::gateway::server::{
    CLOSE_CAPACITY_EXCEEDED, CLOSE_INSUFFICIENT_ROLE, CLOSE_INVALID_CREDENTIAL,
    CLOSE_LIVENESS_TIMEOUT,
};
use floor_gateway::realtime::event::{Priority, TargetSelector};

async fn subscribe(ws: &mut common::TestSocket, subscription_type: &str, target_id: &str) {
    common::send_json(
        ws,
        json!({ "type": "subscribe", "subscription_type": subscription_type, "target_id": target_id }),
    )
    .await;
    let reply = common::recv_json(ws).await;
    assert_eq!(reply["type"], "subscription_confirmed", "{reply}");
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_credential_is_rejected() {
    let (addr, state) = common::start_server(RealtimeConfig::default()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("ws connect");

    assert_eq!(common::expect_close(&mut ws).await, CLOSE_INVALID_CREDENTIAL);
    assert_eq!(state.hub.registry().len(), 0);
}

#[tokio::test]
async fn forged_credential_is_rejected() {
    let (addr, _) = common::start_server(RealtimeConfig::default()).await;
    let mut ws = common::open(addr, "not.a.jwt").await;
    assert_eq!(common::expect_close(&mut ws).await, CLOSE_INVALID_CREDENTIAL);
}

#[tokio::test]
async fn role_outside_allow_list_is_rejected() {
    let (addr, state) = common::start_server(RealtimeConfig::default()).await;
    let token = common::mint_token("usr_guest", &["guest"]);
    let mut ws = common::open(addr, &token).await;

    assert_eq!(common::expect_close(&mut ws).await, CLOSE_INSUFFICIENT_ROLE);
    assert_eq!(state.hub.registry().len(), 0);
}

#[tokio::test]
async fn bearer_header_is_accepted() {
    let (addr, _) = common::start_server(RealtimeConfig::default()).await;
    let token = common::mint_token("usr_hdr", &[common::OPERATOR_ROLE]);

    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    request.headers_mut().insert(
        http::header::AUTHORIZATION,
        http::HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
    );
    let (mut ws, _) = tokio_tungstenite::connect_async(request)
        .await
        .expect("ws connect");

    let hello = common::recv_json(&mut ws).await;
    assert_eq!(hello["type"], "connection_established");
    assert_eq!(hello["data"]["user_id"], "usr_hdr");
}

#[tokio::test]
async fn registry_capacity_is_enforced() {
    let config = RealtimeConfig {
        max_connections: 1,
        ..RealtimeConfig::default()
    };
    let (addr, _) = common::start_server(config).await;
    let (_first, _) = common::connect(addr, "usr_1").await;

    let token = common::mint_token("usr_2", &[common::OPERATOR_ROLE]);
    let mut second = common::open(addr, &token).await;
    assert_eq!(common::expect_close(&mut second).await, CLOSE_CAPACITY_EXCEEDED);
}

#[tokio::test]
async fn connection_established_carries_session_details() {
    let (addr, state) = common::start_server(RealtimeConfig::default()).await;
    let token = common::mint_token("usr_7", &[common::OPERATOR_ROLE]);
    let mut ws = common::open(addr, &token).await;

    let hello = common::recv_json(&mut ws).await;
    assert_eq!(hello["type"], "connection_established");
    assert_eq!(hello["data"]["user_id"], "usr_7");
    assert_eq!(hello["data"]["inactivity_timeout"], 300_000);
    assert_eq!(hello["data"]["heartbeat_interval"], 15_000);
    assert!(hello["timestamp"].is_string());

    let id = hello["data"]["connection_id"].as_str().unwrap();
    assert!(id.starts_with("conn_"));
    assert_eq!(state.hub.registry().lookup(id).unwrap().user_id, "usr_7");
}

// ---------------------------------------------------------------------------
// Subscriptions and fan-out
// ---------------------------------------------------------------------------

#[tokio::test]
async fn downtime_line_subscription_receives_only_its_line() {
    let (addr, state) = common::start_server(RealtimeConfig::default()).await;
    let (mut ws, _) = common::connect(addr, "usr_1").await;
    subscribe(&mut ws, "downtime", "line:L7").await;

    let publisher = state.hub.publisher();
    publisher
        .submit_event("downtime_event", json!({ "line": "L8" }), Priority::Normal, TargetSelector::topic("downtime:L8"))
        .await
        .unwrap();
    publisher
        .submit_event("downtime_event", json!({ "line": "L7" }), Priority::Normal, TargetSelector::topic("downtime:L7"))
        .await
        .unwrap();

    let event = common::recv_json(&mut ws).await;
    assert_eq!(event["type"], "downtime_event");
    assert_eq!(event["data"]["line"], "L7");
    assert_eq!(event["priority"], "normal");
    common::assert_silent(&mut ws, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn escalation_subscriber_receives_exactly_one_envelope() {
    let (addr, state) = common::start_server(RealtimeConfig::default()).await;
    let (mut high, _) = common::connect(addr, "usr_1").await;
    let (mut low, _) = common::connect(addr, "usr_2").await;
    subscribe(&mut high, "escalation", "priority:high").await;
    subscribe(&mut low, "escalation", "priority:low").await;

    state
        .hub
        .publisher()
        .escalation_event("ESC-1", "high", Priority::High, json!({ "level": 2 }))
        .await
        .unwrap();

    let event = common::recv_json(&mut high).await;
    assert_eq!(event["type"], "escalation_event");
    assert_eq!(event["data"]["level"], 2);
    assert!(event["metadata"]["event_id"].is_string());
    common::assert_silent(&mut high, Duration::from_millis(200)).await;
    common::assert_silent(&mut low, Duration::from_millis(50)).await;
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let (addr, state) = common::start_server(RealtimeConfig::default()).await;
    let (mut ws, _) = common::connect(addr, "usr_1").await;
    subscribe(&mut ws, "quality", "line:L3").await;

    common::send_json(
        &mut ws,
        json!({ "type": "unsubscribe", "data": { "subscription_type": "quality", "target_id": "line:L3" } }),
    )
    .await;
    let reply = common::recv_json(&mut ws).await;
    assert_eq!(reply["type"], "unsubscription_confirmed");

    state.hub.publisher().quality_alert("L3", json!({})).await.unwrap();
    common::assert_silent(&mut ws, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn system_announcement_reaches_unsubscribed_clients() {
    let (addr, state) = common::start_server(RealtimeConfig::default()).await;
    let (mut ws, _) = common::connect(addr, "usr_1").await;

    state
        .hub
        .publisher()
        .system_announcement(Priority::Low, json!({ "message": "shift change" }))
        .await
        .unwrap();

    let event = common::recv_json(&mut ws).await;
    assert_eq!(event["type"], "system_announcement");
    assert_eq!(event["metadata"]["system_wide"], true);
}

// ---------------------------------------------------------------------------
// Protocol errors and control messages
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_input_gets_error_and_connection_survives() {
    let (addr, state) = common::start_server(RealtimeConfig::default()).await;
    let (mut ws, id) = common::connect(addr, "usr_1").await;

    ws.send(Message::Text("{this is not json".into())).await.unwrap();
    let reply = common::recv_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["data"]["code"], "VALIDATION_ERROR");

    common::send_json(&mut ws, json!({ "type": "ping" })).await;
    let pong = common::recv_json(&mut ws).await;
    assert_eq!(pong["type"], "pong");
    assert_eq!(pong["data"]["connection_id"], json!(id));

    let counters = state.hub.registry().lookup(&id).unwrap().counters;
    assert_eq!(counters.errors, 1);
    assert!(counters.bytes_received > 0);
}

#[tokio::test]
async fn unknown_type_lists_supported_types() {
    let (addr, _) = common::start_server(RealtimeConfig::default()).await;
    let (mut ws, _) = common::connect(addr, "usr_1").await;

    common::send_json(&mut ws, json!({ "type": "teleport" })).await;
    let reply = common::recv_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
    let supported = reply["data"]["supported_types"].as_array().unwrap();
    assert!(supported.contains(&json!("subscribe")));
    assert!(supported.contains(&json!("acknowledge")));
}

#[tokio::test]
async fn request_data_and_acknowledge_round_trip() {
    let (addr, _) = common::start_server(RealtimeConfig::default()).await;
    let (mut ws, _) = common::connect(addr, "usr_1").await;
    subscribe(&mut ws, "oee", "equipment:EQ-4").await;

    common::send_json(&mut ws, json!({ "type": "request_data", "data_type": "subscriptions" })).await;
    let reply = common::recv_json(&mut ws).await;
    assert_eq!(reply["type"], "data_response");
    assert_eq!(reply["data"]["data"]["topics"], json!(["oee:EQ-4"]));

    common::send_json(&mut ws, json!({ "type": "acknowledge", "event_id": "77", "event_type": "oee_update" })).await;
    let ack = common::recv_json(&mut ws).await;
    assert_eq!(ack["type"], "acknowledged");
    assert_eq!(ack["data"]["event_id"], "77");
}

// ---------------------------------------------------------------------------
// Disconnect and liveness
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnect_unregisters_and_purges_topics() {
    let (addr, state) = common::start_server(RealtimeConfig::default()).await;
    let (mut ws, id) = common::connect(addr, "usr_1").await;
    subscribe(&mut ws, "line", "L1").await;
    ws.close(None).await.unwrap();

    let registry = state.hub.registry().clone();
    time::timeout(Duration::from_secs(2), async move {
        while !registry.is_empty() {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection was not unregistered");

    assert!(state.hub.index().resolve(["line:L1"]).is_empty());
    assert!(state.hub.registry().lookup(&id).is_err());
}

#[tokio::test]
async fn unanswered_probe_evicts_connection() {
    let config = RealtimeConfig {
        inactivity_timeout: Duration::from_millis(200),
        probe_grace: Duration::from_millis(200),
        ..RealtimeConfig::default()
    };
    let (addr, state) = common::start_server(config).await;
    let (mut ws, _) = common::connect(addr, "usr_1").await;

    let probe = common::recv_json(&mut ws).await;
    assert_eq!(probe["type"], "heartbeat");
    assert_eq!(probe["data"]["probe"], true);

    assert_eq!(common::expect_close(&mut ws).await, CLOSE_LIVENESS_TIMEOUT);

    let registry = state.hub.registry().clone();
    time::timeout(Duration::from_secs(2), async move {
        while !registry.is_empty() {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("evicted connection was not unregistered");
}

#[tokio::test]
async fn answered_probe_keeps_connection_open() {
    let config = RealtimeConfig {
        inactivity_timeout: Duration::from_millis(200),
        probe_grace: Duration::from_millis(300),
        ..RealtimeConfig::default()
    };
    let (addr, state) = common::start_server(config).await;
    let (mut ws, id) = common::connect(addr, "usr_1").await;

    let probe = common::recv_json(&mut ws).await;
    assert_eq!(probe["type"], "heartbeat");
    common::send_json(&mut ws, json!({ "type": "heartbeat" })).await;
    let reply = common::recv_json(&mut ws).await;
    assert_eq!(reply["type"], "heartbeat");
    assert_eq!(reply["data"]["status"], "alive");

    assert!(state.hub.registry().lookup(&id).is_ok());
}

#[tokio::test]
async fn client_that_stops_reading_is_disconnected() {
    let config = RealtimeConfig {
        send_timeout: Duration::from_millis(300),
        outbound_buffer: 1024,
        ..RealtimeConfig::default()
    };
    let (addr, state) = common::start_server(config).await;
    let (_ws, id) = common::connect(addr, "usr_stalled").await;

    // Far more than the loopback socket buffers hold; the client never reads.
    let blob = "x".repeat(64 * 1024);
    for n in 0..400 {
        state
            .hub
            .publisher()
            .system_announcement(Priority::Low, json!({ "n": n, "blob": blob }))
            .await
            .unwrap();
    }

    let registry = state.hub.registry().clone();
    time::timeout(Duration::from_secs(10), async move {
        while !registry.is_empty() {
            time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("unwritable connection was not dropped");
    assert!(state.hub.registry().lookup(&id).is_err());
}

// ---------------------------------------------------------------------------
// Health endpoint
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_endpoint_reports_snapshot() {
    let (addr, _) = common::start_server(RealtimeConfig::default()).await;
    let (mut ws, _) = common::connect(addr, "usr_1").await;
    subscribe(&mut ws, "andon", "all").await;

    let body: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .expect("health request")
        .json()
        .await
        .expect("health body");

    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 1);
    assert_eq!(body["topics"]["andon"], 1);
    assert_eq!(body["queue_depth"], 0);
    assert!(body["dispatch"]["recipient_failure_rate"].is_number());
    assert!(body["health_distribution"]["excellent"].is_number());
}
