//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// Malformed inbound lines are deliberately absent: they are reported as
/// [`DecodeSkip`](crate::machine::frame::DecodeSkip) and never leave the
/// reader loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The child process could not be launched.
    Spawn(String),
    /// The readiness frame was not observed within the startup window.
    StartupTimeout(String),
    /// A correlation id was registered while an earlier request with the
    /// same id was still pending.
    DuplicateId(String),
    /// No correlated reply arrived before the request deadline.
    ResponseTimeout(String),
    /// The client was shut down or the child stream closed.
    ClientClosed(String),
    /// Writing to the child's standard input failed.
    Write(String),
    /// Outbound command text violates line framing.
    Protocol(String),
    /// Documentation or log search failure.
    Search(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::StartupTimeout(msg) => write!(f, "startup timeout: {msg}"),
            Self::DuplicateId(msg) => write!(f, "duplicate id: {msg}"),
            Self::ResponseTimeout(msg) => write!(f, "response timeout: {msg}"),
            Self::ClientClosed(msg) => write!(f, "client closed: {msg}"),
            Self::Write(msg) => write!(f, "write: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Search(msg) => write!(f, "search: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<regex::Error> for AppError {
    fn from(err: regex::Error) -> Self {
        Self::Search(format!("invalid pattern: {err}"))
    }
}
