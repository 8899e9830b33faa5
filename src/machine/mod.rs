//! CSend machine-mode stream handling.
//!
//! This module multiplexes one long-running CSend child process speaking
//! newline-delimited JSON over stdio. Outbound commands carry an optional
//! `--id=<token>`; inbound frames are either correlated replies (routed to
//! the waiting caller through the [`registry`]) or unsolicited events
//! (fanned out to [`subscribers`]).
//!
//! Submodules:
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based line framing.
//! - `frame`: frame model and the tolerant decoder.
//! - `transport`: process spawning and the serialised line writer.
//! - `registry`: correlation id → pending result slot.
//! - `subscribers`: event category → handlers, invoked in registration order.
//! - `dispatcher`: frame classification and the single reader loop.
//! - `lifecycle`: process states, startup handshake, shutdown escalation.
//! - `client`: [`MachineClient`](client::MachineClient), tying it all together.

pub mod client;
pub mod codec;
pub mod dispatcher;
pub mod frame;
pub mod lifecycle;
pub mod registry;
pub mod subscribers;
pub mod transport;

pub use client::{ClientOptions, MachineClient, RequestOptions};
pub use frame::{Frame, FrameKind};
pub use lifecycle::ProcessState;
