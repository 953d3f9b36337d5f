use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

static MESSAGE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Where the client connects to. An empty token means the backend is
/// reached without authentication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTarget {
    pub url: String,
    pub token: String,
}

impl ConnectionTarget {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty()
    }

    pub fn is_authenticated(&self) -> bool {
        !self.token.is_empty()
    }

    /// Base HTTP URL with trailing slashes removed.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Anything other than `"user"` is treated as the assistant.
    pub fn from_wire(raw: &str) -> Self {
        if raw == "user" {
            Self::User
        } else {
            Self::Assistant
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    pub timestamp: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            id: next_message_id(),
            role,
            content: content.into(),
            timestamp: timestamp.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content, now_timestamp())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content, now_timestamp())
    }
}

/// Process-unique, monotonically increasing message id.
pub fn next_message_id() -> String {
    let counter = MESSAGE_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("msg_{}_{counter}", Utc::now().timestamp_millis())
}

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_of(id: &str) -> u64 {
        id.rsplit('_').next().expect("suffix").parse().expect("counter")
    }

    #[test]
    fn message_ids_are_unique_and_increasing() {
        let first = ChatMessage::user("a");
        let second = ChatMessage::assistant("b");
        assert_ne!(first.id, second.id);
        assert!(counter_of(&second.id) > counter_of(&first.id));
        assert!(first.id.starts_with("msg_"));
    }

    #[test]
    fn unknown_roles_fall_back_to_assistant() {
        assert_eq!(ChatRole::from_wire("user"), ChatRole::User);
        assert_eq!(ChatRole::from_wire("assistant"), ChatRole::Assistant);
        assert_eq!(ChatRole::from_wire("system"), ChatRole::Assistant);
    }

    #[test]
    fn base_url_strips_trailing_slashes() {
        let target = ConnectionTarget::new("http://host:8080///", "");
        assert_eq!(target.base_url(), "http://host:8080");
        assert!(!target.is_authenticated());
    }
}
