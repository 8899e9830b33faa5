//! Typed command surface over [`MachineClient`].
//!
//! [`Command`] renders the child's slash-command grammar. The façade
//! methods never fail: a timeout, a closed client, or an `error` frame is
//! logged at `WARN` and the operation returns its empty value (`[]`,
//! `false`, `0`, or a default report). Callers that need the failure use
//! [`MachineClient::request`] directly.

use std::fmt::{Display, Formatter};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::machine::client::ID_FLAG;
use crate::machine::{Frame, MachineClient};
use crate::models::message::{BroadcastOutcome, History, HistoryEntry, SendOutcome};
use crate::models::peer::{Peer, PeerList};
use crate::models::status::{StatsReport, StatusReport, VersionInfo};
use crate::{AppError, Result};

/// Default number of entries requested by `/history`.
pub const DEFAULT_HISTORY_COUNT: usize = 10;

/// A command understood by the child in machine mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/list`
    List,
    /// `/send <peer> "<text>"`
    Send {
        /// One-based peer number from `/list`.
        peer: i64,
        /// Message text, escaped when rendered.
        text: String,
    },
    /// `/broadcast "<text>"`
    Broadcast {
        /// Message text, escaped when rendered.
        text: String,
    },
    /// `/status`
    Status,
    /// `/stats`
    Stats,
    /// `/history <count>`
    History {
        /// Number of recent messages.
        count: usize,
    },
    /// `/version`
    Version,
    /// `/help`
    Help,
    /// `/debug`
    Debug,
    /// `/peers [--filter <expr>]`
    Peers {
        /// Optional filter expression, e.g. `status=active`.
        filter: Option<String>,
    },
    /// `/quit`
    Quit,
}

impl Command {
    /// Wire name of the command, as echoed in the response's `command` field.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::List => "/list",
            Self::Send { .. } => "/send",
            Self::Broadcast { .. } => "/broadcast",
            Self::Status => "/status",
            Self::Stats => "/stats",
            Self::History { .. } => "/history",
            Self::Version => "/version",
            Self::Help => "/help",
            Self::Debug => "/debug",
            Self::Peers { .. } => "/peers",
            Self::Quit => "/quit",
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = self.name();
        match self {
            Self::Send { peer, text } => write!(f, "{name} {peer} \"{}\"", escape_message(text)),
            Self::Broadcast { text } => write!(f, "{name} \"{}\"", escape_message(text)),
            Self::History { count } => write!(f, "{name} {count}"),
            Self::Peers {
                filter: Some(filter),
            } => write!(f, "{name} --filter {filter}"),
            _ => f.write_str(name),
        }
    }
}

/// Escape message text for a quoted command argument.
///
/// `"` becomes `\"` and newline becomes the two characters `\n`, so the
/// rendered command is always a single line. The child reads the first
/// `--id=` anywhere in a line as the correlation id, so a word joiner
/// (U+2060) is placed between the dashes of any `--id=` in the text.
#[must_use]
pub fn escape_message(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            other => out.push(other),
        }
    }
    if out.contains(ID_FLAG) {
        out = out.replace(ID_FLAG, ID_FLAG_BROKEN);
    }
    out
}

/// `--id=` with a word joiner between the dashes.
const ID_FLAG_BROKEN: &str = "-\u{2060}-id=";

/// Decode the `data` of a response to `command`.
///
/// # Errors
///
/// `AppError::Protocol` when the frame is an `error` frame, answers a
/// different command, or carries a payload that does not match `T`.
pub fn decode_response<T: DeserializeOwned>(command: &Command, frame: Frame) -> Result<T> {
    if let Some(err) = &frame.error {
        return Err(AppError::Protocol(format!(
            "{} failed: {} ({})",
            command.name(),
            err.message,
            err.code
        )));
    }
    if let Some(echoed) = frame.command.as_deref() {
        if echoed != command.name() {
            return Err(AppError::Protocol(format!(
                "response for {echoed} received for {}",
                command.name()
            )));
        }
    }
    let data = frame
        .data
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    serde_json::from_value(data).map_err(|e| {
        AppError::Protocol(format!("unexpected payload for {}: {e}", command.name()))
    })
}

impl MachineClient {
    async fn typed<T: DeserializeOwned + Default>(&self, command: &Command) -> T {
        match self.typed_request(command).await {
            Ok(value) => value,
            Err(err) => {
                warn!(command = command.name(), error = %err, "command failed, using empty result");
                T::default()
            }
        }
    }

    async fn typed_request<T: DeserializeOwned>(&self, command: &Command) -> Result<T> {
        let frame = self.request(&command.to_string()).await?;
        decode_response(command, frame)
    }

    /// Active peers, or an empty list on failure.
    pub async fn list_peers(&self) -> Vec<Peer> {
        self.typed::<PeerList>(&Command::List).await.peers
    }

    /// Send `text` to peer number `peer`. Returns whether it was delivered.
    pub async fn send_message(&self, peer: i64, text: &str) -> bool {
        let command = Command::Send {
            peer,
            text: text.to_owned(),
        };
        self.typed::<SendOutcome>(&command).await.success
    }

    /// Broadcast `text` to every peer. Returns how many peers it reached.
    pub async fn broadcast_message(&self, text: &str) -> usize {
        let command = Command::Broadcast {
            text: text.to_owned(),
        };
        self.typed::<BroadcastOutcome>(&command).await.sent_count
    }

    /// Child status, or a default report on failure.
    pub async fn status(&self) -> StatusReport {
        self.typed(&Command::Status).await
    }

    /// Message counters, or zeros on failure.
    pub async fn stats(&self) -> StatsReport {
        self.typed(&Command::Stats).await
    }

    /// The `count` most recent messages, oldest first.
    pub async fn history(&self, count: usize) -> Vec<HistoryEntry> {
        self.typed::<History>(&Command::History { count })
            .await
            .messages
    }

    /// Protocol and application versions.
    pub async fn version(&self) -> VersionInfo {
        self.typed(&Command::Version).await
    }

    /// Peers matching `filter` (`/peers --filter <expr>`).
    pub async fn filtered_peers(&self, filter: &str) -> Vec<Peer> {
        let command = Command::Peers {
            filter: Some(filter.to_owned()),
        };
        self.typed::<PeerList>(&command).await.peers
    }
}
