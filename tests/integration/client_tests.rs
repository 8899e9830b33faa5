//! Request correlation, event routing, and closure over in-memory pipes.

use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

use csend_bridge::machine::{ClientOptions, FrameKind, MachineClient, ProcessState, RequestOptions};
use csend_bridge::models::message::IncomingMessage;
use csend_bridge::AppError;

use super::test_helpers::{connect_fake, test_options};

/// Client whose stdin pipe holds `capacity` bytes and is never read.
///
/// Returns the unread stdin end and the child's stdout so both stay open.
async fn connect_unread_stdin(
    capacity: usize,
    options: ClientOptions,
) -> (MachineClient, DuplexStream, DuplexStream) {
    let (client_stdout, mut child_stdout) = tokio::io::duplex(4096);
    let (client_stdin, child_stdin) = tokio::io::duplex(capacity);
    child_stdout
        .write_all(b"{\"type\":\"ready\"}\n")
        .await
        .expect("write ready");
    let client = MachineClient::from_streams(client_stdout, client_stdin, "bot", options)
        .await
        .expect("handshake");
    (client, child_stdin, child_stdout)
}

#[tokio::test]
async fn out_of_order_responses_reach_their_callers() {
    let (client, mut child) = connect_fake(test_options()).await;

    let c1 = client.clone();
    let first = tokio::spawn(async move { c1.request("/list --id=a1").await });
    let c2 = client.clone();
    let second = tokio::spawn(async move { c2.request("/status --id=a2").await });

    let mut seen = vec![child.next_command().await, child.next_command().await];
    seen.sort();
    assert_eq!(seen, vec!["/list --id=a1", "/status --id=a2"]);

    child
        .emit(json!({"type": "response", "id": "a2", "command": "/status", "data": {}}))
        .await;
    child
        .emit(json!({"type": "response", "id": "a1", "command": "/list", "data": {"peers": [], "count": 0}}))
        .await;

    let list = first.await.expect("join").expect("a1 resolved");
    let status = second.await.expect("join").expect("a2 resolved");
    assert_eq!(list.command.as_deref(), Some("/list"));
    assert_eq!(status.command.as_deref(), Some("/status"));
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn generated_ids_are_sequential() {
    let (client, mut child) = connect_fake(test_options()).await;

    for expected in ["/status --id=cmd_1", "/stats --id=cmd_2"] {
        let command = expected.split_whitespace().next().unwrap_or_default().to_owned();
        let c = client.clone();
        let call = tokio::spawn(async move { c.request(&command).await });
        assert_eq!(child.answer_next(json!({})).await, expected);
        call.await.expect("join").expect("resolved");
    }
}

#[tokio::test]
async fn requested_id_is_appended() {
    let (client, mut child) = connect_fake(test_options()).await;

    let c = client.clone();
    let call = tokio::spawn(async move {
        c.request_with("/version", RequestOptions::default().with_id("v1"))
            .await
    });

    assert_eq!(child.answer_next(json!({"protocol_version": "1.0"})).await, "/version --id=v1");
    let frame = call.await.expect("join").expect("resolved");
    assert_eq!(frame.id.as_deref(), Some("v1"));
}

#[tokio::test]
async fn duplicate_pending_id_is_rejected() {
    let (client, mut child) = connect_fake(test_options()).await;

    let c = client.clone();
    let first = tokio::spawn(async move { c.request("/list --id=dup").await });
    let command = child.next_command().await;

    let err = client.request("/status --id=dup").await.expect_err("duplicate");
    assert!(matches!(err, AppError::DuplicateId(_)));

    child.respond(&command, json!({})).await;
    first.await.expect("join").expect("first still resolves");
}

#[tokio::test]
async fn late_response_after_timeout_is_dropped() {
    let (client, mut child) = connect_fake(test_options()).await;

    let err = client
        .request_with(
            "/stats --id=slow",
            RequestOptions::default().with_timeout(Duration::from_millis(100)),
        )
        .await
        .expect_err("timed out");
    assert!(matches!(err, AppError::ResponseTimeout(_)));
    assert_eq!(client.pending_count(), 0);

    let command = child.next_command().await;
    child.respond(&command, json!({})).await;

    // A round trip behind the late frame proves the reader has passed it.
    let c = client.clone();
    let sync = tokio::spawn(async move { c.request("/status --id=sync").await });
    child.answer_next(json!({})).await;
    sync.await.expect("join").expect("resolved");

    // The id is free again and the late frame did not resolve anything.
    let c = client.clone();
    let retry = tokio::spawn(async move { c.request("/stats --id=slow").await });
    let command = child.next_command().await;
    child.respond(&command, json!({"messages_sent": 7})).await;
    let frame = retry.await.expect("join").expect("resolved");
    assert_eq!(frame.data_field("messages_sent"), Some(&json!(7)));
}

#[tokio::test]
async fn noise_between_frames_is_ignored() {
    let (client, mut child) = connect_fake(test_options()).await;

    let c = client.clone();
    let call = tokio::spawn(async move { c.request("/list --id=n1").await });
    let command = child.next_command().await;

    child.emit_raw("[DEBUG] discovery tick").await;
    child.emit_raw("").await;
    child.emit_raw("[1,2,3]").await;
    child
        .emit(json!({"type": "response", "id": "unknown", "command": "/list"}))
        .await;
    child.respond(&command, json!({"peers": []})).await;

    call.await.expect("join").expect("resolved");
}

#[tokio::test]
async fn error_frame_resolves_the_request() {
    let (client, mut child) = connect_fake(test_options()).await;

    let c = client.clone();
    let call = tokio::spawn(async move { c.request("/bogus --id=e1").await });
    child.next_command().await;
    child
        .emit(json!({
            "type": "error",
            "id": "e1",
            "command": "/bogus",
            "error": {"code": "UNKNOWN_COMMAND", "message": "Unknown command: /bogus"}
        }))
        .await;

    let frame = call.await.expect("join").expect("error frame is a reply");
    assert_eq!(frame.kind, FrameKind::Error);
    assert_eq!(frame.error.map(|e| e.code), Some("UNKNOWN_COMMAND".to_owned()));
}

#[tokio::test]
async fn event_with_pending_id_goes_to_subscribers() {
    let (client, mut child) = connect_fake(test_options()).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.on_event("peer_update", move |frame| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(frame);
            Ok(())
        }
    });

    let c = client.clone();
    let call = tokio::spawn(async move { c.request("/list --id=x1").await });
    let command = child.next_command().await;

    child
        .emit(json!({"type": "event", "event": "peer_update", "id": "x1", "data": {"action": "left"}}))
        .await;
    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event delivered")
        .expect("channel open");
    assert_eq!(event.id.as_deref(), Some("x1"));
    assert_eq!(client.pending_count(), 1, "event did not resolve the request");

    child.respond(&command, json!({})).await;
    call.await.expect("join").expect("resolved");
}

#[tokio::test]
async fn message_events_are_decoded_for_typed_handlers() {
    let (client, mut child) = connect_fake(test_options()).await;
    let (tx, mut rx) = mpsc::unbounded_channel::<IncomingMessage>();
    client.on_message(move |message| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(message);
            Ok(())
        }
    });

    child
        .emit(json!({"type": "event", "event": "message"}))
        .await;
    child
        .emit(json!({
            "type": "event",
            "event": "message",
            "data": {"from": {"username": "alice", "ip": "10.0.0.2"}, "content": "hello", "message_id": "msg_1"}
        }))
        .await;

    let message = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("message delivered")
        .expect("channel open");
    assert_eq!(message.from.username, "alice");
    assert_eq!(message.content, "hello");
    assert_eq!(message.message_id.as_deref(), Some("msg_1"));
}

#[tokio::test]
async fn child_eof_fails_pending_and_terminates() {
    let (client, mut child) = connect_fake(test_options()).await;

    let c = client.clone();
    let call = tokio::spawn(async move { c.request("/list --id=gone").await });
    child.next_command().await;
    drop(child);

    let err = call.await.expect("join").expect_err("closed");
    assert!(matches!(err, AppError::ClientClosed(_)));

    tokio::time::timeout(Duration::from_secs(2), client.closed())
        .await
        .expect("client closes");
    assert_eq!(client.state(), ProcessState::Terminated);

    let err = client.send_command("/status").await.expect_err("closed");
    assert!(matches!(err, AppError::ClientClosed(_)));
}

#[tokio::test]
async fn closed_stdin_fails_the_request_and_the_client() {
    let (client, child) = connect_fake(test_options()).await;
    let super::test_helpers::FakeChild { commands, out } = child;
    drop(commands);

    let err = client.request("/status").await.expect_err("write fails");
    assert!(matches!(err, AppError::Write(_)));

    let err = client.request("/status").await.expect_err("client closed");
    assert!(matches!(err, AppError::ClientClosed(_)));
    drop(out);
}

#[tokio::test]
async fn disconnect_sends_quit_and_fails_pending() {
    let (client, mut child) = connect_fake(test_options()).await;

    let c = client.clone();
    let call = tokio::spawn(async move { c.request("/history 5 --id=h").await });
    assert_eq!(child.next_command().await, "/history 5 --id=h");

    assert_eq!(client.disconnect().await, None, "no child process to stop");
    assert_eq!(child.next_command().await, "/quit");

    let err = call.await.expect("join").expect_err("closed");
    assert!(matches!(err, AppError::ClientClosed(_)));
    assert_eq!(client.state(), ProcessState::Terminated);

    // Idempotent.
    assert_eq!(client.disconnect().await, None);
}

#[tokio::test]
async fn commands_with_line_breaks_are_refused() {
    let (client, _child) = connect_fake(test_options()).await;

    let err = client
        .send_command("/send 1 \"a\nb\"")
        .await
        .expect_err("multi-line");
    assert!(matches!(err, AppError::Protocol(_)));
    assert_eq!(client.state(), ProcessState::Running);
}

#[tokio::test]
async fn startup_discards_noise_until_ready() {
    let (client_stdout, mut child_stdout) = tokio::io::duplex(4096);
    let (client_stdin, _child_stdin) = tokio::io::duplex(4096);
    tokio::io::AsyncWriteExt::write_all(
        &mut child_stdout,
        b"CSend starting...\n{\"type\":\"start\"}\n{\"type\":\"response\",\"id\":\"early\"}\n{\"type\":\"ready\"}\n",
    )
    .await
    .expect("write");

    let client = MachineClient::from_streams(client_stdout, client_stdin, "bot", test_options())
        .await
        .expect("ready");

    assert_eq!(client.state(), ProcessState::Running);
    assert_eq!(client.identity(), "bot");
}

#[tokio::test]
async fn missing_ready_times_out() {
    let (client_stdout, _child_stdout) = tokio::io::duplex(4096);
    let (client_stdin, _child_stdin) = tokio::io::duplex(4096);
    let options = ClientOptions {
        startup_timeout: Duration::from_millis(100),
        ..test_options()
    };

    let err = MachineClient::from_streams(client_stdout, client_stdin, "bot", options)
        .await
        .expect_err("no ready");
    assert!(matches!(err, AppError::StartupTimeout(_)));
}

#[tokio::test]
async fn eof_before_ready_is_closed() {
    let (client_stdout, child_stdout) = tokio::io::duplex(4096);
    let (client_stdin, _child_stdin) = tokio::io::duplex(4096);
    drop(child_stdout);

    let err = MachineClient::from_streams(client_stdout, client_stdin, "bot", test_options())
        .await
        .expect_err("eof");
    assert!(matches!(err, AppError::ClientClosed(_)));
}

#[tokio::test]
async fn request_times_out_when_child_stops_reading_stdin() {
    let (client, _stdin, _stdout) = connect_unread_stdin(64, test_options()).await;

    let text = "x".repeat(500);
    let outcome = tokio::time::timeout(
        Duration::from_secs(3),
        client.request_with(
            &format!("/broadcast \"{text}\""),
            RequestOptions::default().with_timeout(Duration::from_millis(200)),
        ),
    )
    .await
    .expect("request finishes within its own deadline");

    assert!(matches!(outcome, Err(AppError::ResponseTimeout(_))), "{outcome:?}");
    assert_eq!(client.pending_count(), 0);

    // Half a line went out; nothing more may follow it.
    let err = client.request("/status").await.expect_err("writer closed");
    assert!(
        matches!(err, AppError::ClientClosed(_) | AppError::Write(_)),
        "{err:?}"
    );
}

#[tokio::test]
async fn disconnect_finishes_when_child_stops_reading_stdin() {
    let (client, _stdin, _stdout) = connect_unread_stdin(4, test_options()).await;

    let exit = tokio::time::timeout(Duration::from_secs(5), client.disconnect())
        .await
        .expect("disconnect is bounded");

    assert_eq!(exit, None);
    assert_eq!(client.state(), ProcessState::Terminated);
}

#[tokio::test]
async fn stuck_subscriber_does_not_delay_responses() {
    let (client, mut child) = connect_fake(test_options()).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.on_event("peer_update", move |_frame| {
        let _ = tx.send(());
        std::future::pending::<csend_bridge::Result<()>>()
    });

    child
        .emit(json!({"type": "event", "event": "peer_update", "data": {"action": "joined"}}))
        .await;
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("handler entered")
        .expect("channel open");

    let c = client.clone();
    let call = tokio::spawn(async move {
        c.request_with(
            "/status --id=live",
            RequestOptions::default().with_timeout(Duration::from_millis(500)),
        )
        .await
    });
    let command = child.next_command().await;
    child.respond(&command, json!({"peer_count": 0})).await;

    let frame = call
        .await
        .expect("join")
        .expect("response arrives while the handler is stuck");
    assert_eq!(frame.id.as_deref(), Some("live"));

    tokio::time::timeout(Duration::from_secs(5), client.disconnect())
        .await
        .expect("disconnect is bounded with a stuck handler");
}
