//! Message protocol definitions
//!
//! One JSON object per frame. The `type` field selects the operation; the
//! remaining fields are optional and depend on the type and direction.

use chrono::Local;
use serde::{Deserialize, Serialize};

/// Timestamp layout for chat entries, e.g. `Monday 14:05`
pub const TIMESTAMP_FORMAT: &str = "%A %H:%M";

/// Message type carried in the `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Login,
    Logout,
    Send,
}

impl MessageType {
    /// Parse a wire name, returning None for anything we do not speak
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "login" => Some(MessageType::Login),
            "logout" => Some(MessageType::Logout),
            "send" => Some(MessageType::Send),
            _ => None,
        }
    }
}

/// Result of a login attempt, sent back in the `status` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStatus {
    Ok,
    Taken,
}

impl LoginStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LoginStatus::Ok => "ok",
            LoginStatus::Taken => "this username is already taken",
        }
    }
}

/// One persisted chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub member: String,
    pub message: String,
    pub timestamp: String,
}

impl ChatEntry {
    /// Create an entry stamped with the current local time
    pub fn now(member: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_timestamp(
            member,
            message,
            Local::now().format(TIMESTAMP_FORMAT).to_string(),
        )
    }

    pub fn with_timestamp(
        member: impl Into<String>,
        message: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            member: member.into(),
            message: message.into(),
            timestamp: timestamp.into(),
        }
    }
}

/// Payload of a `send` message
///
/// Clients send plain text; the server answers with a list of entries
/// (the full history after login, a single entry for live messages).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Entries(Vec<ChatEntry>),
}

/// A protocol message, client → server or server → client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl Message {
    fn new(kind: MessageType) -> Self {
        Self {
            kind,
            username: None,
            content: None,
            status: None,
        }
    }

    /// Login request
    pub fn login(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Self::new(MessageType::Login)
        }
    }

    /// Login response with the outcome in `status`
    pub fn login_response(username: impl Into<String>, status: LoginStatus) -> Self {
        Self {
            username: Some(username.into()),
            status: Some(status.as_str().to_string()),
            ..Self::new(MessageType::Login)
        }
    }

    /// Logout request
    pub fn logout(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Self::new(MessageType::Logout)
        }
    }

    /// Chat message from a client
    pub fn send(username: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            content: Some(Content::Text(text.into())),
            ..Self::new(MessageType::Send)
        }
    }

    /// Server frame carrying entries (history or a live message)
    pub fn entries(entries: Vec<ChatEntry>) -> Self {
        Self {
            content: Some(Content::Entries(entries)),
            ..Self::new(MessageType::Send)
        }
    }

    /// Username, if present and non-empty
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref().filter(|name| !name.is_empty())
    }

    /// Text payload of a client `send`
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            Some(Content::Text(text)) => Some(text),
            _ => None,
        }
    }

    /// Entries payload of a server `send`
    pub fn chat_entries(&self) -> Option<&[ChatEntry]> {
        match &self.content {
            Some(Content::Entries(entries)) => Some(entries),
            _ => None,
        }
    }

    /// Status string of a login response
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }
}
