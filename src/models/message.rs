//! Chat message events and history entries.

use serde::{Deserialize, Serialize};

/// Sender block of an incoming message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageSender {
    /// Sender username.
    #[serde(default = "unknown_user")]
    pub username: String,
    /// Sender IP address.
    #[serde(default)]
    pub ip: String,
    /// Peer number, when the child knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

fn unknown_user() -> String {
    "unknown".into()
}

/// Payload of a `message` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Who sent it.
    pub from: MessageSender,
    /// Message text.
    #[serde(default)]
    pub content: String,
    /// Child-assigned message id (`msg_<n>`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// One entry of a `/history` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    /// When the message was received (ISO-8601, UTC).
    #[serde(default)]
    pub timestamp: String,
    /// Sender username.
    #[serde(default)]
    pub from: String,
    /// Message text.
    #[serde(default)]
    pub content: String,
}

/// Payload of a `/history` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct History {
    /// Messages, oldest first.
    #[serde(default)]
    pub messages: Vec<HistoryEntry>,
    /// Number of messages returned.
    #[serde(default)]
    pub count: usize,
}

/// Payload of a `/send` response.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendOutcome {
    /// Whether the child delivered the message.
    #[serde(default)]
    pub success: bool,
}

/// Payload of a `/broadcast` response.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Number of peers the broadcast reached.
    #[serde(default)]
    pub sent_count: usize,
}
