//! Bounded per-identity conversation history.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The peer talking to the bot.
    User,
    /// The bot's reply.
    Assistant,
}

/// One conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    /// Author of the turn.
    pub role: Role,
    /// Turn text.
    pub content: String,
}

impl Turn {
    /// A turn written by the user.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// A turn written by the bot.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// FIFO history per identity, capped at `max_turns`.
///
/// Appending past the cap drops the oldest turns first.
#[derive(Debug)]
pub struct ContextStore {
    max_turns: usize,
    turns: Mutex<HashMap<String, VecDeque<Turn>>>,
}

impl ContextStore {
    /// Keep at most `max_turns` turns per identity.
    #[must_use]
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns,
            turns: Mutex::new(HashMap::new()),
        }
    }

    /// Append `turn` for `identity`, evicting the oldest turns over the cap.
    pub fn push(&self, identity: &str, turn: Turn) {
        let mut turns = self.turns.lock().unwrap_or_else(PoisonError::into_inner);
        let history = turns.entry(identity.to_owned()).or_default();
        history.push_back(turn);
        while history.len() > self.max_turns {
            history.pop_front();
        }
    }

    /// Snapshot of `identity`'s history, oldest first.
    #[must_use]
    pub fn history(&self, identity: &str) -> Vec<Turn> {
        self.turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of turns retained for `identity`.
    #[must_use]
    pub fn len(&self, identity: &str) -> usize {
        self.turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .map_or(0, VecDeque::len)
    }

    /// Forget `identity`'s history.
    pub fn clear(&self, identity: &str) {
        self.turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identity);
    }
}
