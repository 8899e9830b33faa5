//! Peer records and peer-update events.

use serde::{Deserialize, Serialize};

/// One active peer as reported by `/list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Peer {
    /// One-based peer number used by `/send`.
    pub id: i64,
    /// Announced username.
    pub username: String,
    /// Peer IP address.
    #[serde(default)]
    pub ip: String,
    /// Last time the peer was seen (ISO-8601, UTC).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
    /// Peer status, usually `active`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Payload of a `/list` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerList {
    /// Active peers.
    #[serde(default)]
    pub peers: Vec<Peer>,
    /// Count reported by the child.
    #[serde(default)]
    pub count: usize,
}

/// Payload of a `peer_update` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerUpdate {
    /// `joined`, `left`, or `changed`.
    #[serde(default = "unknown_action")]
    pub action: String,
    /// The peer concerned, when the child includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<Peer>,
}

fn unknown_action() -> String {
    "unknown".into()
}

impl PeerUpdate {
    /// The joined peer, if this update announces one.
    #[must_use]
    pub fn joined_peer(&self) -> Option<&Peer> {
        if self.action == "joined" {
            self.peer.as_ref()
        } else {
            None
        }
    }
}
