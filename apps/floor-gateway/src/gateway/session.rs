//! Per-connection gateway session state.

use chrono::{DateTime, Utc};

use crate::auth::Principal;
use crate::realtime::registry::ConnectionId;

/// State for a single registered WebSocket connection.
#[derive(Debug, Clone)]
pub struct GatewaySession {
    /// Registry id (`conn_` prefixed ULID).
    pub connection_id: ConnectionId,
    pub user_id: String,
    pub roles: Vec<String>,
    pub connected_at: DateTime<Utc>,
}

impl GatewaySession {
    pub fn new(connection_id: ConnectionId, principal: Principal) -> Self {
        Self {
            connection_id,
            user_id: principal.user_id,
            roles: principal.roles,
            connected_at: Utc::now(),
        }
    }
}
