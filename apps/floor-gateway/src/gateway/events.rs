//! Wire-format messages of the realtime socket.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::error::RealtimeError;

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// Inbound message types understood by the gateway.
pub const SUPPORTED_TYPES: [&str; 6] = [
    "subscribe",
    "unsubscribe",
    "ping",
    "heartbeat",
    "request_data",
    "acknowledge",
];

#[derive(Debug, Deserialize)]
pub struct SubscribePayload {
    pub subscription_type: String,
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub filters: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribePayload {
    pub subscription_type: String,
    #[serde(default)]
    pub target_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RequestDataPayload {
    pub data_type: String,
    #[serde(default)]
    pub filters: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct AcknowledgePayload {
    /// String or number; echoed back unchanged.
    pub event_id: Value,
    #[serde(default)]
    pub event_type: Option<String>,
}

#[derive(Debug)]
pub enum ClientMessage {
    Subscribe(SubscribePayload),
    Unsubscribe(UnsubscribePayload),
    Ping,
    Heartbeat,
    RequestData(RequestDataPayload),
    Acknowledge(AcknowledgePayload),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InboundError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("unknown message type '{0}'")]
    UnknownType(String),
}

impl ClientMessage {
    /// Parse a text frame.
    ///
    /// Fields may sit at the top level or inside a `data` object; top-level
    /// fields win when both are present.
    pub fn parse(text: &str) -> Result<Self, InboundError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| InboundError::Malformed(e.to_string()))?;
        let Value::Object(mut object) = value else {
            return Err(InboundError::Malformed("expected a JSON object".into()));
        };

        let kind = match object.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => return Err(InboundError::Malformed("missing 'type' field".into())),
        };

        let mut fields = match object.remove("data") {
            Some(Value::Object(data)) => data,
            _ => Map::new(),
        };
        fields.extend(object);
        let fields = Value::Object(fields);

        match kind.as_str() {
            "subscribe" => Ok(Self::Subscribe(payload(fields)?)),
            "unsubscribe" => Ok(Self::Unsubscribe(payload(fields)?)),
            "ping" => Ok(Self::Ping),
            "heartbeat" => Ok(Self::Heartbeat),
            "request_data" => Ok(Self::RequestData(payload(fields)?)),
            "acknowledge" => Ok(Self::Acknowledge(payload(fields)?)),
            _ => Err(InboundError::UnknownType(kind)),
        }
    }
}

fn payload<T: DeserializeOwned>(fields: Value) -> Result<T, InboundError> {
    serde_json::from_value(fields).map_err(|e| InboundError::Malformed(e.to_string()))
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

/// A `{type, data, timestamp}` reply sent on the socket.
#[derive(Debug, Clone)]
pub struct ServerMessage {
    pub kind: &'static str,
    pub data: Value,
}

impl ServerMessage {
    pub const CONNECTION_ESTABLISHED: &'static str = "connection_established";
    pub const SUBSCRIPTION_CONFIRMED: &'static str = "subscription_confirmed";
    pub const UNSUBSCRIPTION_CONFIRMED: &'static str = "unsubscription_confirmed";
    pub const PONG: &'static str = "pong";
    pub const HEARTBEAT: &'static str = "heartbeat";
    pub const DATA_RESPONSE: &'static str = "data_response";
    pub const ACKNOWLEDGED: &'static str = "acknowledged";
    pub const ERROR: &'static str = "error";

    pub fn new(kind: &'static str, data: Value) -> Self {
        Self { kind, data }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::new(Self::ERROR, json!({ "code": code, "message": message.into() }))
    }

    pub fn from_error(err: &RealtimeError) -> Self {
        Self::error(err.code(), err.to_string())
    }

    /// Reply for an unparseable or unknown inbound frame.
    pub fn from_inbound_error(err: &InboundError) -> Self {
        let mut reply = Self::from_error(&RealtimeError::validation(err.to_string()));
        if matches!(err, InboundError::UnknownType(_)) {
            reply.data["supported_types"] = json!(SUPPORTED_TYPES);
        }
        reply
    }

    pub fn is_error(&self) -> bool {
        self.kind == Self::ERROR
    }

    /// Serialized text frame.
    pub fn to_frame(&self) -> String {
        json!({
            "type": self.kind,
            "data": self.data,
            "timestamp": Utc::now(),
        })
        .to_string()
    }
}
