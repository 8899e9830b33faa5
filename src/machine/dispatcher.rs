//! Frame dispatcher and the single reader loop.
//!
//! The reader loop is the only consumer of the child's stdout. It decodes
//! each line, classifies the frame, and either resolves a pending request
//! in the [`CorrelationRegistry`] directly or hands the frame to the event
//! pump over an unbounded channel. Handing off instead of awaiting
//! subscribers keeps correlated responses flowing while a subscriber is
//! busy, including a subscriber that is itself waiting on a response.
//!
//! # Classification
//!
//! | `type`              | Route                                       |
//! |---------------------|---------------------------------------------|
//! | `ready`             | [`Route::Ready`] (ignored after startup)    |
//! | `start`, `shutdown` | [`Route::Informational`]                    |
//! | `response`, `error` | [`Route::Correlated`] / [`Route::Uncorrelated`] |
//! | `event`             | [`Route::Event`]                            |
//! | *(anything else)*   | [`Route::Ignored`]                          |

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::machine::codec::MachineCodec;
use crate::machine::frame::{self, Frame, FrameKind};
use crate::machine::registry::CorrelationRegistry;
use crate::machine::subscribers::SubscriberTable;

/// Where a decoded frame goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Readiness signal.
    Ready,
    /// Banner or shutdown notice; no action.
    Informational,
    /// Response or error carrying a correlation id.
    Correlated(String),
    /// Response or error with no id.
    Uncorrelated,
    /// Unsolicited event with its category name.
    Event(String),
    /// Not actionable.
    Ignored,
}

/// Classify `frame` by its `type` discriminant.
///
/// Event frames are always routed as events, even when they carry an `id`,
/// so an event can never be mistaken for the reply to an expired request.
#[must_use]
pub fn classify(frame: &Frame) -> Route {
    match frame.kind {
        FrameKind::Ready => Route::Ready,
        FrameKind::Start | FrameKind::Shutdown => Route::Informational,
        FrameKind::Response | FrameKind::Error => match &frame.id {
            Some(id) => Route::Correlated(id.clone()),
            None => Route::Uncorrelated,
        },
        FrameKind::Event => Route::Event(frame.event.clone().unwrap_or_default()),
        FrameKind::Unknown => Route::Ignored,
    }
}

/// Why the reader loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderExit {
    /// The child closed its stdout.
    EndOfStream,
    /// The stream failed with an I/O error.
    StreamError(String),
    /// The cancellation token fired.
    Cancelled,
}

/// Per-frame counters, mainly for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Frames successfully decoded.
    pub frames: u64,
    /// Lines skipped by the frame decoder or dropped as over-long.
    pub skipped: u64,
    /// Correlated frames delivered to a waiter.
    pub resolved: u64,
    /// Response/error frames with no matching waiter.
    pub dropped: u64,
    /// Event frames handed to the pump.
    pub events: u64,
}

/// Routes decoded frames to the registry or the event pump.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<CorrelationRegistry>,
    event_tx: mpsc::UnboundedSender<Frame>,
    stats: DispatchStats,
}

impl Dispatcher {
    /// Create a dispatcher feeding `event_tx`.
    #[must_use]
    pub fn new(registry: Arc<CorrelationRegistry>, event_tx: mpsc::UnboundedSender<Frame>) -> Self {
        Self {
            registry,
            event_tx,
            stats: DispatchStats::default(),
        }
    }

    /// Counters accumulated so far.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Decode and dispatch one raw line. Malformed lines are skipped.
    pub fn dispatch_line(&mut self, line: &str) {
        match frame::decode(line) {
            Ok(frame) => self.dispatch(frame),
            Err(skip) => {
                self.stats.skipped += 1;
                debug!(reason = %skip, raw_line = %line, "skipping undecodable line");
            }
        }
    }

    /// Dispatch one decoded frame.
    pub fn dispatch(&mut self, frame: Frame) {
        self.stats.frames += 1;
        match classify(&frame) {
            Route::Ready => debug!("repeated ready signal ignored"),
            Route::Informational => {
                debug!(kind = frame.kind.as_str(), "informational frame");
            }
            Route::Correlated(id) => {
                if self.registry.resolve(&id, frame) {
                    self.stats.resolved += 1;
                } else {
                    self.stats.dropped += 1;
                }
            }
            Route::Uncorrelated => {
                self.stats.dropped += 1;
                match &frame.error {
                    Some(err) => debug!(
                        code = %err.code,
                        message = %err.message,
                        "uncorrelated error frame dropped"
                    ),
                    None => debug!(command = ?frame.command, "uncorrelated response dropped"),
                }
            }
            Route::Event(event) => {
                self.stats.events += 1;
                if self.event_tx.send(frame).is_err() {
                    debug!(event, "event pump closed, dropping event");
                }
            }
            Route::Ignored => {
                debug!(id = ?frame.id, "frame without recognised type ignored");
            }
        }
    }
}

/// Reader loop: the single consumer of the child's stdout.
///
/// Runs until EOF, an unrecoverable stream error, or cancellation. On exit
/// for any reason other than cancellation the registry is closed so every
/// outstanding await fails with `AppError::ClientClosed`.
pub async fn run_reader<R>(
    stdout: FramedRead<R, MachineCodec>,
    mut dispatcher: Dispatcher,
    cancel: CancellationToken,
) -> (ReaderExit, DispatchStats)
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = stdout;

    let exit = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("reader: cancellation received, stopping");
                break ReaderExit::Cancelled;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!("reader: EOF detected");
                        break ReaderExit::EndOfStream;
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "reader: stream error, stopping");
                        break ReaderExit::StreamError(err.to_string());
                    }
                    Some(Ok(line)) => dispatcher.dispatch_line(&line),
                }
            }
        }
    };

    if exit != ReaderExit::Cancelled {
        dispatcher.registry.close();
    }
    dispatcher.stats.skipped += framed.decoder().discarded();

    (exit, dispatcher.stats)
}

/// Event pump: delivers event frames to subscribers in arrival order.
///
/// Ends when every sender is dropped (reader exited) or `cancel` fires.
pub async fn run_event_pump(
    mut event_rx: mpsc::UnboundedReceiver<Frame>,
    subscribers: Arc<SubscriberTable>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("event pump: cancellation received, stopping");
                break;
            }

            next = event_rx.recv() => {
                let Some(frame) = next else {
                    debug!("event pump: channel closed, stopping");
                    break;
                };
                subscribers.notify(&frame).await;
            }
        }
    }
}
