//! `/status`, `/stats`, and `/version` payloads.

use serde::{Deserialize, Serialize};

/// Listening ports reported by `/status`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkInfo {
    /// TCP message port.
    #[serde(default)]
    pub tcp_port: u16,
    /// UDP discovery port.
    #[serde(default)]
    pub udp_port: u16,
}

/// Counters embedded in `/status`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusCounters {
    /// Direct messages sent.
    #[serde(default)]
    pub messages_sent: u64,
    /// Messages received.
    #[serde(default)]
    pub messages_received: u64,
    /// Broadcasts sent.
    #[serde(default)]
    pub broadcasts_sent: u64,
    /// Currently active peers.
    #[serde(default)]
    pub active_peers: u64,
}

/// Payload of a `/status` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusReport {
    /// Seconds since the child started.
    #[serde(default)]
    pub uptime_seconds: u64,
    /// Child version string.
    #[serde(default)]
    pub version: String,
    /// Local username.
    #[serde(default)]
    pub username: String,
    /// Listening ports.
    #[serde(default)]
    pub network: NetworkInfo,
    /// Message counters.
    #[serde(default)]
    pub statistics: StatusCounters,
}

/// Payload of a `/stats` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsReport {
    /// Direct messages sent.
    #[serde(default)]
    pub messages_sent: u64,
    /// Messages received.
    #[serde(default)]
    pub messages_received: u64,
    /// Broadcasts sent.
    #[serde(default)]
    pub broadcasts_sent: u64,
    /// Peers seen since start.
    #[serde(default)]
    pub total_peers_seen: u64,
    /// Currently active peers.
    #[serde(default)]
    pub current_active_peers: u64,
}

/// Payload of a `/version` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionInfo {
    /// Machine protocol version.
    #[serde(default)]
    pub protocol_version: String,
    /// Application version.
    #[serde(default)]
    pub app_version: String,
}
