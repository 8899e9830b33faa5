//! Inbound frame model and decoder.
//!
//! Every line written by the child is expected to be one self-contained JSON
//! object. The decoder is tolerant by contract: blank lines, invalid JSON and
//! non-object values are reported as [`DecodeSkip`] so the reader loop can
//! log them and move on. Diagnostic output and partial writes on the same
//! stream are normal.
//!
//! # Frame shape
//!
//! ```json
//! {"type":"response","id":"cmd_3","command":"/list","data":{"peers":[],"count":0}}
//! {"type":"event","event":"peer_update","data":{"action":"joined"}}
//! {"type":"error","id":"cmd_4","error":{"code":"UNKNOWN_COMMAND","message":"…"}}
//! ```

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Frame discriminant carried in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// The child accepts commands.
    Ready,
    /// Startup banner.
    Start,
    /// Correlated success reply.
    Response,
    /// Correlated (or uncorrelated) failure reply.
    Error,
    /// Unsolicited notification.
    Event,
    /// The child is exiting.
    Shutdown,
    /// Missing or unrecognised `type`.
    #[default]
    #[serde(other)]
    Unknown,
}

impl FrameKind {
    /// Wire name of the discriminant.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Start => "start",
            Self::Response => "response",
            Self::Error => "error",
            Self::Event => "event",
            Self::Shutdown => "shutdown",
            Self::Unknown => "unknown",
        }
    }
}

/// Structured error payload of an `error` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameError {
    /// Machine-readable code such as `UNKNOWN_COMMAND`.
    #[serde(default)]
    pub code: String,
    /// Human-readable description.
    #[serde(default)]
    pub message: String,
    /// Optional command-specific details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// One decoded JSON object from the child's output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Frame discriminant.
    #[serde(rename = "type", default)]
    pub kind: FrameKind,
    /// Correlation identifier, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Command echoed by a response (e.g. `/list`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Event category for `event` frames (e.g. `message`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Command- or event-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error payload for `error` frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FrameError>,
    /// Remaining fields (`timestamp`, `version`, …).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Frame {
    /// Build a frame of the given kind with no payload.
    #[must_use]
    pub fn new(kind: FrameKind) -> Self {
        Self {
            kind,
            id: None,
            command: None,
            event: None,
            data: None,
            error: None,
            extra: Map::new(),
        }
    }

    /// Whether this frame reports a failure.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.kind == FrameKind::Error
    }

    /// Look up a field inside `data`.
    #[must_use]
    pub fn data_field(&self, key: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|d| d.get(key))
    }
}

/// Why a line did not produce a [`Frame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeSkip {
    /// Empty or whitespace-only line.
    Blank,
    /// Not valid JSON.
    Malformed(String),
    /// Valid JSON but not an object.
    NotAnObject,
}

impl Display for DecodeSkip {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blank => write!(f, "blank line"),
            Self::Malformed(err) => write!(f, "malformed json: {err}"),
            Self::NotAnObject => write!(f, "json value is not an object"),
        }
    }
}

/// Decode one line into a [`Frame`].
///
/// An empty id and the literal `"null"` (written by the child when the
/// command carried no id) are both normalised to `None`.
///
/// # Errors
///
/// Returns a [`DecodeSkip`] describing why the line is not a frame. Callers
/// log it and continue; it is never fatal.
pub fn decode(line: &str) -> Result<Frame, DecodeSkip> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(DecodeSkip::Blank);
    }

    let value: Value =
        serde_json::from_str(trimmed).map_err(|e| DecodeSkip::Malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(DecodeSkip::NotAnObject);
    }

    let mut frame: Frame =
        serde_json::from_value(value).map_err(|e| DecodeSkip::Malformed(e.to_string()))?;

    if matches!(frame.id.as_deref(), Some("" | "null")) {
        frame.id = None;
    }

    Ok(frame)
}
