//! Chatbot consumer of the machine-mode client.
//!
//! The bot subscribes to `message` and `peer_update` events. Every message
//! passes the per-sender rate limiter first; `!`-prefixed text is a bot
//! command, anything else goes to the [`Responder`] together with the
//! sender's bounded history. Failures never reach the peer as raw errors:
//! they become short textual notices.

pub mod context;
pub mod rate_limit;
pub mod responder;

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::BotConfig;
use crate::machine::MachineClient;
use crate::models::message::IncomingMessage;
use crate::models::peer::{Peer, PeerUpdate};

use self::context::{ContextStore, Turn};
use self::rate_limit::SlidingWindowLimiter;
use self::responder::Responder;

/// Sent when a sender exceeds the rate limit.
pub const RATE_LIMIT_NOTICE: &str = "Sorry, you're sending messages too quickly. Please wait a moment.";

/// Sent when the responder fails.
pub const RESPONDER_FAILURE_NOTICE: &str =
    "Sorry, I encountered an error processing your message. Please try again.";

/// Bot commands and their descriptions, in `!help` order.
pub const BOT_COMMANDS: [(&str, &str); 5] = [
    ("!help", "Show available commands"),
    ("!peers", "List active peers"),
    ("!stats", "Show chat statistics"),
    ("!clear", "Clear conversation history"),
    ("!about", "About this bot"),
];

/// Point-in-time copy of the bot's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Message events received.
    pub messages_received: u64,
    /// Replies the child confirmed as delivered.
    pub messages_sent: u64,
    /// Distinct usernames that talked to the bot.
    pub users_helped: usize,
    /// Time since the bot was created.
    pub uptime: Duration,
}

#[derive(Debug)]
struct BotStats {
    received: AtomicU64,
    sent: AtomicU64,
    users: Mutex<HashSet<String>>,
    started: Instant,
}

struct BotInner {
    client: MachineClient,
    config: BotConfig,
    limiter: SlidingWindowLimiter,
    context: ContextStore,
    responder: Arc<dyn Responder>,
    stats: BotStats,
}

/// Chatbot bound to one [`MachineClient`]. Cheap to clone.
#[derive(Clone)]
pub struct Chatbot {
    inner: Arc<BotInner>,
}

impl Chatbot {
    /// Create a bot over `client`. Nothing is subscribed until
    /// [`start`](Self::start).
    #[must_use]
    pub fn new(client: MachineClient, config: BotConfig, responder: Arc<dyn Responder>) -> Self {
        let limiter = SlidingWindowLimiter::new(
            config.rate_limit,
            Duration::from_secs(config.rate_window_seconds),
        );
        let context = ContextStore::new(config.max_context);
        Self {
            inner: Arc::new(BotInner {
                client,
                config,
                limiter,
                context,
                responder,
                stats: BotStats {
                    received: AtomicU64::new(0),
                    sent: AtomicU64::new(0),
                    users: Mutex::new(HashSet::new()),
                    started: Instant::now(),
                },
            }),
        }
    }

    /// The underlying client.
    #[must_use]
    pub fn client(&self) -> &MachineClient {
        &self.inner.client
    }

    /// Conversation history store.
    #[must_use]
    pub fn context(&self) -> &ContextStore {
        &self.inner.context
    }

    /// Subscribe to events and greet peers that are already connected.
    pub async fn start(&self) {
        let bot = self.clone();
        self.inner.client.on_message(move |message| {
            let bot = bot.clone();
            async move {
                bot.handle_message(message).await;
                Ok(())
            }
        });

        let bot = self.clone();
        self.inner.client.on_peer_update(move |update| {
            let bot = bot.clone();
            async move {
                bot.handle_peer_update(&update);
                Ok(())
            }
        });

        let peers = self.inner.client.list_peers().await;
        if peers.is_empty() {
            info!("chatbot ready, no peers connected yet");
        } else {
            let reached = self
                .inner
                .client
                .broadcast_message(&self.inner.config.greeting)
                .await;
            info!(peers = peers.len(), reached, "chatbot ready, greeting broadcast");
        }
    }

    /// Counters at this instant.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        let stats = &self.inner.stats;
        StatsSnapshot {
            messages_received: stats.received.load(Ordering::Relaxed),
            messages_sent: stats.sent.load(Ordering::Relaxed),
            users_helped: stats
                .users
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            uptime: stats.started.elapsed(),
        }
    }

    /// Process one incoming chat message.
    pub async fn handle_message(&self, message: IncomingMessage) {
        let inner = &self.inner;
        inner.stats.received.fetch_add(1, Ordering::Relaxed);
        let username = message.from.username.clone();

        let span = info_span!("bot_message", from = %username);
        async {
            let peer_id = match message.from.id {
                Some(id) => Some(id),
                None => self.lookup_peer_id(&username).await,
            };
            let Some(peer_id) = peer_id else {
                warn!("no peer id for sender, message ignored");
                return;
            };

            inner
                .stats
                .users
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(username.clone());

            if !inner.limiter.check(&username).is_allowed() {
                self.reply(peer_id, RATE_LIMIT_NOTICE).await;
                return;
            }

            let content = message.content.trim();
            if content.starts_with('!') {
                let text = self.command_reply(&username, content).await;
                self.reply(peer_id, &text).await;
                return;
            }

            let text = self.generate(&username, content).await;
            self.reply(peer_id, &text).await;
        }
        .instrument(span)
        .await;
    }

    async fn lookup_peer_id(&self, username: &str) -> Option<i64> {
        self.inner
            .client
            .list_peers()
            .await
            .into_iter()
            .find(|peer| peer.username == username)
            .map(|peer| peer.id)
    }

    async fn reply(&self, peer_id: i64, text: &str) {
        if self.inner.client.send_message(peer_id, text).await {
            self.inner.stats.sent.fetch_add(1, Ordering::Relaxed);
        } else {
            warn!(peer_id, "reply not delivered");
        }
    }

    async fn generate(&self, username: &str, content: &str) -> String {
        let inner = &self.inner;
        inner.context.push(username, Turn::user(content));
        let history = inner.context.history(username);

        match inner.responder.respond(username, &history).await {
            Ok(text) => {
                inner.context.push(username, Turn::assistant(text.clone()));
                text
            }
            Err(err) => {
                warn!(error = %err, "responder failed");
                RESPONDER_FAILURE_NOTICE.to_owned()
            }
        }
    }

    /// Reply text for a `!`-prefixed bot command.
    pub async fn command_reply(&self, username: &str, content: &str) -> String {
        let command = content
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_lowercase();
        debug!(command, "bot command");

        match command.as_str() {
            "!help" => help_text(),
            "!peers" => format_peers(&self.inner.client.list_peers().await),
            "!stats" => format_stats(&self.stats()),
            "!clear" => {
                self.inner.context.clear(username);
                "Conversation history cleared.".to_owned()
            }
            "!about" => self.inner.config.about.clone(),
            other => format!("Unknown command: {other}. Type !help for available commands."),
        }
    }

    /// Greet a peer that just joined, after the configured delay.
    ///
    /// The greeting is sent from its own task so the event pump is not held
    /// for the delay.
    pub fn handle_peer_update(&self, update: &PeerUpdate) {
        let Some(peer) = update.joined_peer().cloned() else {
            debug!(action = %update.action, "peer update ignored");
            return;
        };
        let bot = self.clone();
        let delay = Duration::from_millis(self.inner.config.peer_greeting_delay_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let greeting = welcome_text(&peer, &bot.inner.config.greeting);
            bot.reply(peer.id, &greeting).await;
        });
    }

    /// Wait until the underlying client has terminated.
    pub async fn run_until_closed(&self) {
        self.inner.client.closed().await;
        info!(stats = ?self.stats(), "chatbot stopped");
    }
}

/// `!help` reply.
#[must_use]
pub fn help_text() -> String {
    let mut text = String::from("Available commands:\n");
    for (command, description) in BOT_COMMANDS {
        let _ = writeln!(text, "  {command} - {description}");
    }
    text
}

/// `!peers` reply.
#[must_use]
pub fn format_peers(peers: &[Peer]) -> String {
    if peers.is_empty() {
        return "No other peers currently connected.".to_owned();
    }
    let mut text = String::from("Active peers:\n");
    for peer in peers {
        let _ = writeln!(text, "  • {} ({})", peer.username, peer.ip);
    }
    text
}

/// Uptime as `{h}h {m}m`.
#[must_use]
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
}

/// `!stats` reply.
#[must_use]
pub fn format_stats(stats: &StatsSnapshot) -> String {
    format!(
        "Bot Statistics:\n• Uptime: {}\n• Messages received: {}\n• Messages sent: {}\n• Users helped: {}",
        format_uptime(stats.uptime),
        stats.messages_received,
        stats.messages_sent,
        stats.users_helped
    )
}

/// Greeting for a newly joined peer.
#[must_use]
pub fn welcome_text(peer: &Peer, greeting: &str) -> String {
    format!("Welcome {}! {greeting}", peer.username)
}
