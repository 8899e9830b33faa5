//! Correlation registry: in-flight correlation id → pending result slot.
//!
//! The registry is the only mutable structure shared between the reader
//! loop and callers. Each entry pairs a `oneshot` sender with a generation
//! number. The caller-side [`PendingResponse`] owns the receiver and removes
//! its own entry on drop, so a timed-out or cancelled await can never leak
//! an entry or remove a later registration that reused the same id.
//!
//! All operations take a short, synchronous lock and never hold it across
//! an `.await`, so resolution of one id never waits on another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::machine::frame::Frame;
use crate::{AppError, Result};

#[derive(Debug, Default)]
struct RegistryState {
    pending: HashMap<String, Slot>,
    next_generation: u64,
    closed: bool,
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    tx: oneshot::Sender<Frame>,
}

/// Thread-safe map of pending requests keyed by correlation id.
#[derive(Debug, Default)]
pub struct CorrelationRegistry {
    state: Mutex<RegistryState>,
}

impl CorrelationRegistry {
    /// Create an empty, open registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // A panic while holding this lock cannot leave the map inconsistent:
        // every critical section is a single insert/remove.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a pending request for `id`.
    ///
    /// # Errors
    ///
    /// - `AppError::DuplicateId` if `id` is already pending.
    /// - `AppError::ClientClosed` if the registry has been closed.
    pub fn register(self: &Arc<Self>, id: &str) -> Result<PendingResponse> {
        let mut state = self.lock();
        if state.closed {
            return Err(AppError::ClientClosed(format!(
                "cannot register '{id}': client is closed"
            )));
        }
        if state.pending.contains_key(id) {
            return Err(AppError::DuplicateId(format!(
                "correlation id '{id}' is already pending"
            )));
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        let (tx, rx) = oneshot::channel();
        state
            .pending
            .insert(id.to_owned(), Slot { generation, tx });
        drop(state);

        debug!(id, "correlation registered");
        Ok(PendingResponse {
            id: id.to_owned(),
            generation,
            rx,
            registry: Arc::clone(self),
        })
    }

    /// Fulfil the pending request for `id` with `frame`.
    ///
    /// Returns `true` when a waiter received the frame. Unknown ids (late,
    /// expired, or never issued) are dropped and return `false`; a second
    /// resolution of the same id is therefore a no-op.
    pub fn resolve(&self, id: &str, frame: Frame) -> bool {
        let slot = self.lock().pending.remove(id);
        match slot {
            Some(slot) => {
                if slot.tx.send(frame).is_ok() {
                    true
                } else {
                    debug!(id, "waiter dropped before resolution");
                    false
                }
            }
            None => {
                debug!(id, "no pending request for correlation id, dropping frame");
                false
            }
        }
    }

    /// Whether `id` is currently pending.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.lock().pending.contains_key(id)
    }

    /// Number of outstanding requests.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Close the registry.
    ///
    /// Every outstanding await fails with `AppError::ClientClosed` and no
    /// further registrations are accepted. Returns how many requests were
    /// cancelled. Idempotent.
    pub fn close(&self) -> usize {
        let drained: Vec<Slot> = {
            let mut state = self.lock();
            state.closed = true;
            state.pending.drain().map(|(_, slot)| slot).collect()
        };
        let cancelled = drained.len();
        // Dropping the senders wakes every receiver with `RecvError`.
        drop(drained);
        if cancelled > 0 {
            debug!(cancelled, "registry closed with outstanding requests");
        }
        cancelled
    }

    fn remove_if_current(&self, id: &str, generation: u64) -> bool {
        let mut state = self.lock();
        match state.pending.get(id) {
            Some(slot) if slot.generation == generation => {
                state.pending.remove(id);
                true
            }
            _ => false,
        }
    }
}

/// Caller-side handle for one registered request.
///
/// Dropping the handle unregisters the request if it is still pending.
#[derive(Debug)]
pub struct PendingResponse {
    id: String,
    generation: u64,
    rx: oneshot::Receiver<Frame>,
    registry: Arc<CorrelationRegistry>,
}

impl PendingResponse {
    /// Correlation id of this request.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the resolving frame.
    ///
    /// # Errors
    ///
    /// - `AppError::ResponseTimeout` when `timeout` elapses first; the entry
    ///   is removed and a later resolution for this id is dropped.
    /// - `AppError::ClientClosed` when the registry is closed while waiting.
    pub async fn wait(mut self, timeout: Duration) -> Result<Frame> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(AppError::ClientClosed(format!(
                "client closed while waiting for '{}'",
                self.id
            ))),
            Err(_elapsed) => {
                self.registry.remove_if_current(&self.id, self.generation);
                // Close the receiver so a resolve racing with the removal
                // above observes a dropped waiter instead of a delivery.
                self.rx.close();
                debug!(id = %self.id, ?timeout, "correlated response timed out");
                Err(AppError::ResponseTimeout(format!(
                    "no response for '{}' within {timeout:?}",
                    self.id
                )))
            }
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.registry.remove_if_current(&self.id, self.generation);
    }
}
