//! Chatbot reply formatting.

use std::time::Duration;

use csend_bridge::bot::{
    format_peers, format_stats, format_uptime, help_text, welcome_text, StatsSnapshot,
    BOT_COMMANDS,
};
use csend_bridge::models::peer::Peer;

fn peer(id: i64, username: &str, ip: &str) -> Peer {
    Peer {
        id,
        username: username.into(),
        ip: ip.into(),
        last_seen: None,
        status: Some("active".into()),
    }
}

#[test]
fn help_lists_every_command() {
    let text = help_text();
    assert!(text.starts_with("Available commands:\n"));
    for (command, description) in BOT_COMMANDS {
        assert!(text.contains(&format!("  {command} - {description}")));
    }
}

#[test]
fn peers_listing() {
    assert_eq!(format_peers(&[]), "No other peers currently connected.");
    let text = format_peers(&[peer(1, "alice", "10.0.0.2"), peer(2, "bob", "10.0.0.3")]);
    assert_eq!(
        text,
        "Active peers:\n  • alice (10.0.0.2)\n  • bob (10.0.0.3)\n"
    );
}

#[test]
fn uptime_is_hours_and_minutes() {
    assert_eq!(format_uptime(Duration::from_secs(59)), "0h 0m");
    assert_eq!(format_uptime(Duration::from_secs(3 * 3600 + 25 * 60 + 7)), "3h 25m");
}

#[test]
fn stats_report() {
    let text = format_stats(&StatsSnapshot {
        messages_received: 4,
        messages_sent: 3,
        users_helped: 2,
        uptime: Duration::from_secs(3660),
    });
    assert_eq!(
        text,
        "Bot Statistics:\n• Uptime: 1h 1m\n• Messages received: 4\n• Messages sent: 3\n• Users helped: 2"
    );
}

#[test]
fn welcome_names_the_peer() {
    assert_eq!(
        welcome_text(&peer(3, "carol", "10.0.0.4"), "How can I help?"),
        "Welcome carol! How can I help?"
    );
}
