//! Inbound message dispatch: subscribe, unsubscribe, ping, heartbeat,
//! request_data and acknowledge.

use serde_json::json;
use tokio::time::Instant;

use crate::error::{RealtimeError, RealtimeResult};
use crate::realtime::topics::SubscriptionType;
use crate::AppState;

use super::events::{
    AcknowledgePayload, ClientMessage, RequestDataPayload, ServerMessage, SubscribePayload,
    UnsubscribePayload,
};
use super::session::GatewaySession;
use super::subscription::{subscription_topic, ScopeSelector};

/// Handle one text frame and build the reply. Every inbound frame gets
/// exactly one reply; failures become `error` replies.
pub async fn handle_text(state: &AppState, session: &GatewaySession, text: &str) -> ServerMessage {
    let message = match ClientMessage::parse(text) {
        Ok(message) => message,
        Err(err) => {
            tracing::debug!(connection_id = %session.connection_id, error = %err, "rejected inbound frame");
            return ServerMessage::from_inbound_error(&err);
        }
    };

    let result = match message {
        ClientMessage::Subscribe(p) => subscribe(state, session, p),
        ClientMessage::Unsubscribe(p) => unsubscribe(state, session, p),
        ClientMessage::Ping => Ok(ServerMessage::new(
            ServerMessage::PONG,
            json!({ "connection_id": session.connection_id }),
        )),
        ClientMessage::Heartbeat => Ok(ServerMessage::new(
            ServerMessage::HEARTBEAT,
            json!({ "status": "alive" }),
        )),
        ClientMessage::RequestData(p) => request_data(state, session, p).await,
        ClientMessage::Acknowledge(p) => Ok(acknowledge(session, p)),
    };

    result.unwrap_or_else(|err| {
        tracing::debug!(connection_id = %session.connection_id, error = %err, "inbound request failed");
        ServerMessage::from_error(&err)
    })
}

fn subscription_type(raw: &str) -> RealtimeResult<SubscriptionType> {
    raw.parse().map_err(|_| {
        RealtimeError::validation(format!(
            "unknown subscription type '{raw}'; supported: {}",
            SubscriptionType::supported().join(", ")
        ))
    })
}

fn subscribe(
    state: &AppState,
    session: &GatewaySession,
    payload: SubscribePayload,
) -> RealtimeResult<ServerMessage> {
    let kind = subscription_type(&payload.subscription_type)?;
    let scope = ScopeSelector::parse(payload.target_id.as_deref())?;
    let topic = subscription_topic(kind, &scope)?;

    let added = state.hub.index().subscribe(&session.connection_id, &topic)?;
    tracing::debug!(connection_id = %session.connection_id, %topic, added, "subscribed");

    Ok(ServerMessage::new(
        ServerMessage::SUBSCRIPTION_CONFIRMED,
        json!({
            "subscription_type": kind,
            "target_id": payload.target_id.as_deref().unwrap_or("all"),
            "topic": topic,
            "filters": payload.filters,
        }),
    ))
}

fn unsubscribe(
    state: &AppState,
    session: &GatewaySession,
    payload: UnsubscribePayload,
) -> RealtimeResult<ServerMessage> {
    let kind = subscription_type(&payload.subscription_type)?;
    let scope = ScopeSelector::parse(payload.target_id.as_deref())?;
    let topic = subscription_topic(kind, &scope)?;

    let removed = state.hub.index().unsubscribe(&session.connection_id, &topic);
    tracing::debug!(connection_id = %session.connection_id, %topic, removed, "unsubscribed");

    Ok(ServerMessage::new(
        ServerMessage::UNSUBSCRIPTION_CONFIRMED,
        json!({
            "subscription_type": kind,
            "target_id": payload.target_id.as_deref().unwrap_or("all"),
            "topic": topic,
        }),
    ))
}

async fn request_data(
    state: &AppState,
    session: &GatewaySession,
    payload: RequestDataPayload,
) -> RealtimeResult<ServerMessage> {
    let data = match payload.data_type.as_str() {
        "subscriptions" => {
            let mut topics: Vec<String> = state
                .hub
                .index()
                .topics_of(&session.connection_id)
                .unwrap_or_default()
                .into_iter()
                .collect();
            topics.sort();
            json!({ "topics": topics })
        }
        "connection_info" => {
            let connection = state.hub.registry().lookup(&session.connection_id)?;
            let now = Instant::now();
            json!({
                "connection_id": connection.connection_id,
                "user_id": connection.user_id,
                "roles": session.roles,
                "connected_at": session.connected_at,
                "uptime_secs": connection.uptime(now).as_secs(),
                "idle_secs": connection.idle_for(now).as_secs(),
                "subscription_count": connection.subscribed_topics.len(),
                "counters": connection.counters,
                "health_score": connection.health_score,
                "status": connection.status,
            })
        }
        "system_status" => serde_json::to_value(state.hub.snapshot())
            .map_err(|e| RealtimeError::Resolution(e.to_string()))?,
        other => state
            .data
            .fetch(other, payload.filters.as_ref(), &session.user_id)
            .await?
            .ok_or_else(|| RealtimeError::validation(format!("unknown data_type '{other}'")))?,
    };

    Ok(ServerMessage::new(
        ServerMessage::DATA_RESPONSE,
        json!({ "data_type": payload.data_type, "data": data }),
    ))
}

fn acknowledge(session: &GatewaySession, payload: AcknowledgePayload) -> ServerMessage {
    tracing::debug!(
        connection_id = %session.connection_id,
        event_id = %payload.event_id,
        event_type = payload.event_type.as_deref().unwrap_or("-"),
        "event acknowledged"
    );
    ServerMessage::new(
        ServerMessage::ACKNOWLEDGED,
        json!({ "event_id": payload.event_id }),
    )
}
