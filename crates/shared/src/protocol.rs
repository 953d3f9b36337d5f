use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{
    domain::{now_timestamp, ChatRole},
    error::DecodeError,
};

/// Path the chat socket is served under.
pub const CHAT_PATH: &str = "/ws/chat";

/// Server closed the socket because the session went idle.
pub const CLOSE_IDLE: u16 = 1001;
/// Server rejected the token.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;

const UNKNOWN_ERROR: &str = "Unknown error";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    Connected {
        session_id: String,
    },
    Message {
        role: ChatRole,
        content: String,
        timestamp: String,
    },
    Typing {
        status: bool,
    },
    Error {
        content: String,
    },
    Pong,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Message { content: String },
    Ping,
}

impl ClientFrame {
    pub fn message(content: impl Into<String>) -> Self {
        Self::Message {
            content: content.into(),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Message { content } => json!({ "type": "message", "content": content }),
            Self::Ping => json!({ "type": "ping" }),
        }
        .to_string()
    }
}

/// Decodes one inbound text frame. Missing `message` fields fall back to
/// assistant role, empty content and the current time.
pub fn decode_server_frame(raw: &str) -> Result<ServerFrame, DecodeError> {
    let value: Value = serde_json::from_str(raw)?;
    let Value::Object(fields) = value else {
        return Err(DecodeError::MissingType);
    };
    let kind = fields
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?;

    match kind {
        "connected" => {
            let session_id = fields
                .get("session_id")
                .and_then(Value::as_str)
                .ok_or(DecodeError::InvalidField {
                    frame: "connected",
                    field: "session_id",
                })?;
            Ok(ServerFrame::Connected {
                session_id: session_id.to_string(),
            })
        }
        "message" => Ok(ServerFrame::Message {
            role: fields
                .get("role")
                .and_then(Value::as_str)
                .map(ChatRole::from_wire)
                .unwrap_or(ChatRole::Assistant),
            content: string_field(&fields, "content").unwrap_or_default(),
            timestamp: string_field(&fields, "timestamp").unwrap_or_else(now_timestamp),
        }),
        "typing" => Ok(ServerFrame::Typing {
            status: fields.get("status").is_some_and(is_truthy),
        }),
        "error" => Ok(ServerFrame::Error {
            content: string_field(&fields, "content").unwrap_or_else(|| UNKNOWN_ERROR.into()),
        }),
        "pong" => Ok(ServerFrame::Pong),
        other => Err(DecodeError::UnknownType(other.to_string())),
    }
}

fn string_field(fields: &Map<String, Value>, name: &str) -> Option<String> {
    fields
        .get(name)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
