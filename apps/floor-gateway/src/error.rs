//! Error taxonomy for the realtime core.

use thiserror::Error;

use crate::auth::AuthError;

/// Errors surfaced by the registry, index, dispatcher and ingress adapter.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Handshake rejected; the connection is never registered.
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),

    /// Malformed or unknown inbound message. The connection stays open.
    #[error("{0}")]
    Validation(String),

    /// Registry is full.
    #[error("connection capacity exceeded (max {max})")]
    CapacityExceeded { max: usize },

    /// Dispatcher queue stayed full for the whole backpressure window.
    #[error("event queue saturated")]
    QueueSaturated,

    /// The connection id is not (or no longer) registered.
    #[error("connection {0} not found")]
    NotFound(String),

    /// Sending to one recipient failed.
    #[error("delivery to {connection_id} failed: {reason}")]
    Delivery {
        connection_id: String,
        reason: String,
    },

    /// Resolving or serializing an event failed.
    #[error("event resolution failed: {0}")]
    Resolution(String),
}

impl RealtimeError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn delivery(connection_id: &str, reason: impl Into<String>) -> Self {
        Self::Delivery {
            connection_id: connection_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code carried in `error` envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "AUTHENTICATION_FAILED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            Self::QueueSaturated => "QUEUE_SATURATED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Delivery { .. } => "DELIVERY_FAILED",
            Self::Resolution(_) => "RESOLUTION_FAILED",
        }
    }
}

pub type RealtimeResult<T> = Result<T, RealtimeError>;
