//! WebSocket upgrade handler and per-connection event loop.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{self, Duration, Instant};

use crate::auth::{bearer_credential, AuthError};
use crate::error::RealtimeError;
use crate::realtime::registry::{ConnectionHandle, OutboundFrame};
use crate::AppState;

use super::events::ServerMessage;
use super::handler::handle_text;
use super::liveness::{LivenessAction, LivenessTracker};
use super::session::GatewaySession;

/// Close codes (4000-range for application-level).
pub const CLOSE_INVALID_CREDENTIAL: u16 = 4001;
pub const CLOSE_INSUFFICIENT_ROLE: u16 = 4003;
pub const CLOSE_CAPACITY_EXCEEDED: u16 = 4008;
pub const CLOSE_LIVENESS_TIMEOUT: u16 = 4009;

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    token: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ConnectQuery>,
) -> impl IntoResponse {
    let credential = bearer_credential(&headers, query.token.as_deref());
    ws.on_upgrade(move |socket| handle_connection(socket, state, credential))
}

async fn handle_connection(socket: WebSocket, state: AppState, credential: Option<String>) {
    let (mut ws_tx, ws_rx) = socket.split();

    // Step 1: verify the bearer credential.
    let verified = match credential {
        Some(credential) => state.verifier.verify(&credential).await,
        None => Err(AuthError::InvalidCredential),
    };
    let principal = match verified {
        Ok(principal) => principal,
        Err(err) => {
            tracing::info!(error = %err, "realtime handshake rejected");
            let code = match err {
                AuthError::InvalidCredential => CLOSE_INVALID_CREDENTIAL,
                AuthError::InsufficientRole => CLOSE_INSUFFICIENT_ROLE,
            };
            let _ = send_close(&mut ws_tx, code, &err.to_string()).await;
            return;
        }
    };

    // Step 2: register.
    let realtime = &state.config.realtime;
    let (handle, outbound_rx) = ConnectionHandle::channel(realtime.outbound_buffer);
    let connection_id = match state.hub.registry().register(handle, &principal.user_id) {
        Ok(id) => id,
        Err(err) => {
            tracing::warn!(user_id = %principal.user_id, error = %err, "realtime handshake rejected");
            let _ = send_close(&mut ws_tx, CLOSE_CAPACITY_EXCEEDED, &err.to_string()).await;
            return;
        }
    };
    let session = GatewaySession::new(connection_id, principal);

    // Step 3: greet, then run until the socket closes or liveness fails.
    let liveness = LivenessTracker::new(realtime.inactivity_timeout, realtime.probe_grace, Instant::now());
    let established = ServerMessage::new(
        ServerMessage::CONNECTION_ESTABLISHED,
        json!({
            "connection_id": session.connection_id,
            "user_id": session.user_id,
            "heartbeat_interval": liveness.check_interval().as_millis() as u64,
            "inactivity_timeout": realtime.inactivity_timeout.as_millis() as u64,
        }),
    );
    if send_reply(&state, &session, &mut ws_tx, &established).await {
        tracing::info!(
            connection_id = %session.connection_id,
            user_id = %session.user_id,
            "realtime session established"
        );
        run_session(&state, &session, ws_tx, ws_rx, outbound_rx, liveness).await;
    }

    state.hub.registry().unregister(&session.connection_id);
    tracing::info!(
        connection_id = %session.connection_id,
        user_id = %session.user_id,
        "realtime session ended"
    );
}

/// Main session loop: answer client frames, forward dispatched events,
/// probe idle clients.
async fn run_session(
    state: &AppState,
    session: &GatewaySession,
    mut ws_tx: WsSink,
    mut ws_rx: WsStream,
    mut outbound_rx: mpsc::Receiver<OutboundFrame>,
    mut liveness: LivenessTracker,
) {
    let registry = state.hub.registry();
    let write_timeout = state.config.realtime.send_timeout;
    let mut liveness_timer = time::interval(liveness.check_interval());
    liveness_timer.tick().await; // First tick fires immediately; skip it.

    loop {
        tokio::select! {
            // Client sends us a message.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        liveness.on_inbound(Instant::now());
                        registry.record_activity(&session.connection_id, text.as_str().len() as u64, 0, false);

                        let reply = handle_text(state, session, text.as_str()).await;
                        if reply.is_error() {
                            registry.record_activity(&session.connection_id, 0, 0, true);
                        }
                        if !send_reply(state, session, &mut ws_tx, &reply).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        liveness.on_inbound(Instant::now());
                        registry.record_activity(&session.connection_id, bytes.len() as u64, 0, true);
                        let reply = ServerMessage::from_error(&RealtimeError::validation(
                            "binary frames are not supported",
                        ));
                        if !send_reply(state, session, &mut ws_tx, &reply).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        liveness.on_inbound(Instant::now());
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %session.connection_id, "ws read error");
                        break;
                    }
                }
            }

            // Event frame queued by the dispatcher.
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else { break };
                if !write_frame(session, &mut ws_tx, frame.to_string(), write_timeout).await {
                    break;
                }
            }

            _ = liveness_timer.tick() => {
                match liveness.poll(Instant::now()) {
                    LivenessAction::None => {}
                    LivenessAction::Probe => {
                        let probe = ServerMessage::new(ServerMessage::HEARTBEAT, json!({ "probe": true }));
                        if !send_reply(state, session, &mut ws_tx, &probe).await {
                            break;
                        }
                    }
                    LivenessAction::Evict => {
                        tracing::warn!(
                            connection_id = %session.connection_id,
                            user_id = %session.user_id,
                            "liveness probe unanswered, evicting"
                        );
                        let _ = time::timeout(
                            write_timeout,
                            send_close(&mut ws_tx, CLOSE_LIVENESS_TIMEOUT, "liveness timeout"),
                        )
                        .await;
                        break;
                    }
                }
            }
        }
    }
}

/// Write a reply directly on the socket. Returns `false` once the socket is
/// gone or stops accepting writes.
async fn send_reply(
    state: &AppState,
    session: &GatewaySession,
    ws_tx: &mut WsSink,
    reply: &ServerMessage,
) -> bool {
    let frame = reply.to_frame();
    let len = frame.len() as u64;
    if !write_frame(session, ws_tx, frame, state.config.realtime.send_timeout).await {
        return false;
    }
    state
        .hub
        .registry()
        .record_activity(&session.connection_id, 0, len, false);
    true
}

/// Send one text frame, giving up after `limit` so a client that stopped
/// reading cannot park the session task past the liveness timer.
async fn write_frame(session: &GatewaySession, ws_tx: &mut WsSink, frame: String, limit: Duration) -> bool {
    match time::timeout(limit, ws_tx.send(Message::Text(frame.into()))).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::debug!(?e, connection_id = %session.connection_id, "ws write failed");
            false
        }
        Err(_) => {
            tracing::warn!(
                connection_id = %session.connection_id,
                user_id = %session.user_id,
                timeout_ms = limit.as_millis() as u64,
                "ws write timed out, disconnecting"
            );
            false
        }
    }
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
