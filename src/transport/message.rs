//! Protocol frames.
//!
//! Inbound frames are decoded in two steps: the JSON text is read into a
//! flat [`RawFrame`] of untyped values, so `request_id` survives a badly
//! typed field, then each field the frame's `type` needs is validated into
//! a [`ClientMessage`].
//! Outbound frames are the [`ServerMessage`] sum type.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tungstenite::protocol::Message as WsMessage;

use crate::broker::message::Message;
use crate::utils::{BrokerError, ErrorCode};

/// Current time as an ISO-8601 UTC timestamp with second precision.
pub fn now_ts() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: Option<Value>,
    topic: Option<Value>,
    client_id: Option<Value>,
    message: Option<Value>,
    last_n: Option<Value>,
    request_id: Option<Value>,
}

/// Why an inbound frame was rejected before dispatch. Always reported as
/// `BAD_REQUEST`, echoing `request_id` when it could be recovered.
#[derive(Debug)]
pub struct DecodeError {
    pub request_id: Option<String>,
    pub reason: String,
}

impl DecodeError {
    fn new(request_id: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            request_id,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Subscribe {
        topic: String,
        client_id: String,
        last_n: usize,
        request_id: Option<String>,
    },
    Unsubscribe {
        topic: String,
        client_id: String,
        request_id: Option<String>,
    },
    Publish {
        topic: String,
        message: Message,
        request_id: Option<String>,
    },
    Ping {
        request_id: Option<String>,
    },
}

impl ClientMessage {
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let raw: RawFrame = serde_json::from_str(text)
            .map_err(|_| DecodeError::new(None, "Invalid JSON format"))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawFrame) -> Result<Self, DecodeError> {
        let request_id = match &raw.request_id {
            Some(Value::String(id)) => Some(id.clone()),
            _ => None,
        };
        Self::validate(raw, request_id.clone())
            .map_err(|reason| DecodeError::new(request_id, reason))
    }

    fn validate(raw: RawFrame, request_id: Option<String>) -> Result<Self, String> {
        match required_str(raw.kind, "type")?.as_str() {
            "subscribe" => Ok(ClientMessage::Subscribe {
                topic: required_str(raw.topic, "topic")?,
                client_id: required_str(raw.client_id, "client_id")?,
                last_n: count(raw.last_n)?,
                request_id,
            }),
            "unsubscribe" => Ok(ClientMessage::Unsubscribe {
                topic: required_str(raw.topic, "topic")?,
                client_id: required_str(raw.client_id, "client_id")?,
                request_id,
            }),
            "publish" => Ok(ClientMessage::Publish {
                topic: required_str(raw.topic, "topic")?,
                message: message(raw.message)?,
                request_id,
            }),
            "ping" => Ok(ClientMessage::Ping { request_id }),
            other => Err(format!("Unknown message type: {other}")),
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            ClientMessage::Subscribe { request_id, .. }
            | ClientMessage::Unsubscribe { request_id, .. }
            | ClientMessage::Publish { request_id, .. }
            | ClientMessage::Ping { request_id } => request_id.as_deref(),
        }
    }
}

/// Empty strings count as missing.
fn required_str(value: Option<Value>, field: &str) -> Result<String, String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(Value::String(_)) | None => Err(format!("{field} is required")),
        Some(_) => Err(format!("{field} must be a string")),
    }
}

fn count(value: Option<Value>) -> Result<usize, String> {
    let Some(value) = value else {
        return Ok(0);
    };
    value
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| "last_n must be a non-negative integer".to_string())
}

fn message(value: Option<Value>) -> Result<Message, String> {
    let mut fields = match value {
        Some(Value::Object(fields)) => fields,
        None => return Err("message is required".to_string()),
        Some(_) => return Err("message must be an object".to_string()),
    };
    Ok(Message {
        id: required_str(fields.remove("id"), "message.id")?,
        payload: fields.remove("payload").unwrap_or(Value::Null),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

/// Frames sent from the broker to a client.
///
/// `request_id` is echoed on synchronous responses only; `event` and `info`
/// are asynchronous deliveries and never carry one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Ack {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
        status: String,
        ts: String,
    },
    Event {
        topic: String,
        message: Message,
        ts: String,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        ts: String,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        error: ErrorInfo,
        ts: String,
    },
    Info {
        topic: String,
        msg: String,
        ts: String,
    },
}

impl ServerMessage {
    pub fn ack(request_id: Option<String>, topic: Option<String>) -> Self {
        ServerMessage::Ack {
            request_id,
            topic,
            status: "ok".to_string(),
            ts: now_ts(),
        }
    }

    pub fn event(topic: String, message: Message) -> Self {
        ServerMessage::Event {
            topic,
            message,
            ts: now_ts(),
        }
    }

    pub fn pong(request_id: Option<String>) -> Self {
        ServerMessage::Pong {
            request_id,
            ts: now_ts(),
        }
    }

    pub fn error(request_id: Option<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            request_id,
            error: ErrorInfo {
                code,
                message: message.into(),
            },
            ts: now_ts(),
        }
    }

    pub fn from_error(request_id: Option<String>, err: &BrokerError) -> Self {
        Self::error(request_id, err.code(), err.to_string())
    }

    pub fn topic_deleted(topic: String) -> Self {
        ServerMessage::Info {
            topic,
            msg: "topic_deleted".to_string(),
            ts: now_ts(),
        }
    }

    /// Encodes the frame as a WebSocket text message.
    pub fn to_ws(&self) -> Result<WsMessage, BrokerError> {
        let text = serde_json::to_string(self)?;
        Ok(WsMessage::text(text))
    }
}
