//! Per-identity sliding-window rate limiter.
//!
//! Each identity keeps the instants of its accepted events. Every check
//! first prunes instants older than the window and only then compares the
//! remaining count against the limit, so the decision is exact at the
//! moment of the check. There is no background sweeper.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// The event was counted and may be processed.
    Allowed {
        /// Slots left in the current window after this event.
        remaining: usize,
    },
    /// The identity is over its limit; the event was not counted.
    Limited {
        /// Time until the oldest counted event leaves the window.
        retry_after: Duration,
    },
}

impl RateDecision {
    /// Whether the event may be processed.
    #[must_use]
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Sliding-window counter keyed by identity.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    limit: usize,
    window: Duration,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    /// Allow at most `limit` events per identity within any `window`.
    #[must_use]
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Check and count an event for `identity` at the current instant.
    pub fn check(&self, identity: &str) -> RateDecision {
        self.check_at(identity, Instant::now())
    }

    /// Check and count an event for `identity` at `now`.
    pub fn check_at(&self, identity: &str, now: Instant) -> RateDecision {
        let mut hits = self.hits.lock().unwrap_or_else(PoisonError::into_inner);
        let times = hits.entry(identity.to_owned()).or_default();

        while let Some(&oldest) = times.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                times.pop_front();
            } else {
                break;
            }
        }

        if times.len() >= self.limit {
            let retry_after = times.front().map_or(Duration::ZERO, |&oldest| {
                self.window
                    .saturating_sub(now.saturating_duration_since(oldest))
            });
            debug!(identity, count = times.len(), ?retry_after, "rate limited");
            return RateDecision::Limited { retry_after };
        }

        times.push_back(now);
        RateDecision::Allowed {
            remaining: self.limit - times.len(),
        }
    }

    /// Events currently counted for `identity`, without pruning.
    #[must_use]
    pub fn counted(&self, identity: &str) -> usize {
        self.hits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .map_or(0, VecDeque::len)
    }
}
