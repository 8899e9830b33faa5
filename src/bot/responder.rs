//! Reply generation seam.
//!
//! The chatbot hands every non-command message, together with the sender's
//! history, to a [`Responder`]. The shipped [`FallbackResponder`] answers
//! with a fixed notice; a model-backed implementation plugs in here.

use std::future::Future;
use std::pin::Pin;

use crate::bot::context::Turn;
use crate::Result;

/// Produces a reply for one user message.
pub trait Responder: Send + Sync {
    /// Generate a reply to the last turn of `history`.
    ///
    /// `history` ends with the user's newest message.
    ///
    /// # Errors
    ///
    /// Any error makes the chatbot send its generic failure notice instead.
    fn respond<'a>(
        &'a self,
        username: &'a str,
        history: &'a [Turn],
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
}

/// Replies with the same configured text to every message.
#[derive(Debug, Clone)]
pub struct FallbackResponder {
    reply: String,
}

impl FallbackResponder {
    /// Always answer with `reply`.
    #[must_use]
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

impl Responder for FallbackResponder {
    fn respond<'a>(
        &'a self,
        _username: &'a str,
        _history: &'a [Turn],
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move { Ok(self.reply.clone()) })
    }
}
