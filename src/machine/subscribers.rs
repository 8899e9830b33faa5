//! Event subscriber table and fan-out.
//!
//! Handlers are bound to an [`EventCategory`]. For each event frame the
//! table invokes, in order:
//!
//! 1. the typed category (`message` → [`EventCategory::Message`],
//!    `peer_update` → [`EventCategory::PeerUpdate`]),
//! 2. handlers registered by name for the same event (`on_event("message")`),
//! 3. wildcard handlers ([`EventCategory::Any`]).
//!
//! Within a category handlers run in registration order. Every invocation
//! runs in its own task and is awaited before the next one starts, so a
//! handler that fails or panics is logged and the remaining handlers still
//! run.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::machine::frame::Frame;
use crate::Result;

/// Boxed future returned by a subscriber.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

/// Type-erased event handler.
pub type Handler = Arc<dyn Fn(Frame) -> HandlerFuture + Send + Sync>;

/// Event category a handler is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventCategory {
    /// Incoming chat message (`"event":"message"`).
    Message,
    /// Peer joined, left, or changed (`"event":"peer_update"`).
    PeerUpdate,
    /// Any event with this exact name.
    Named(String),
    /// Every event frame.
    Any,
}

impl EventCategory {
    /// Typed category for a wire event name, if one exists.
    #[must_use]
    pub fn typed(event: &str) -> Option<Self> {
        match event {
            "message" => Some(Self::Message),
            "peer_update" => Some(Self::PeerUpdate),
            _ => None,
        }
    }
}

/// Registered handlers keyed by category.
#[derive(Default)]
pub struct SubscriberTable {
    handlers: RwLock<HashMap<EventCategory, Vec<Handler>>>,
}

impl std::fmt::Debug for SubscriberTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<EventCategory, usize> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), v.len()))
            .collect();
        f.debug_struct("SubscriberTable")
            .field("handlers", &counts)
            .finish()
    }
}

impl SubscriberTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `category`.
    pub fn subscribe(&self, category: EventCategory, handler: Handler) {
        debug!(?category, "subscriber registered");
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(category)
            .or_default()
            .push(handler);
    }

    /// Number of handlers bound to `category`.
    #[must_use]
    pub fn count(&self, category: &EventCategory) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(category)
            .map_or(0, Vec::len)
    }

    /// Remove every handler.
    pub fn clear(&self) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Handlers to run for `event`, in invocation order.
    fn snapshot(&self, event: &str) -> Vec<Handler> {
        let table = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let mut ordered = Vec::new();
        if let Some(typed) = EventCategory::typed(event) {
            ordered.extend(table.get(&typed).into_iter().flatten().cloned());
        }
        ordered.extend(
            table
                .get(&EventCategory::Named(event.to_owned()))
                .into_iter()
                .flatten()
                .cloned(),
        );
        ordered.extend(table.get(&EventCategory::Any).into_iter().flatten().cloned());
        ordered
    }

    /// Invoke every handler bound to the frame's event.
    ///
    /// Returns how many handlers completed successfully.
    pub async fn notify(&self, frame: &Frame) -> usize {
        let event = frame.event.as_deref().unwrap_or_default();
        let handlers = self.snapshot(event);
        let mut succeeded = 0;

        for handler in handlers {
            let fut = handler(frame.clone());
            match tokio::spawn(fut).await {
                Ok(Ok(())) => succeeded += 1,
                Ok(Err(err)) => {
                    warn!(event, error = %err, "event subscriber failed");
                }
                Err(join_err) => {
                    warn!(event, error = %join_err, "event subscriber panicked");
                }
            }
        }

        succeeded
    }
}

/// Wrap an async closure as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Frame) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |frame| Box::pin(f(frame)) as HandlerFuture)
}
