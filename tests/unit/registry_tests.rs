//! Correlation registry: single resolution, timeouts, and cleanup.

use std::time::Duration;

use csend_bridge::machine::registry::CorrelationRegistry;
use csend_bridge::machine::{Frame, FrameKind};
use csend_bridge::AppError;

fn response(id: &str) -> Frame {
    let mut frame = Frame::new(FrameKind::Response);
    frame.id = Some(id.to_owned());
    frame
}

#[tokio::test]
async fn resolved_request_returns_its_frame() {
    let registry = CorrelationRegistry::new();
    let pending = registry.register("a1").expect("register");

    assert!(registry.resolve("a1", response("a1")));

    let frame = pending
        .wait(Duration::from_secs(1))
        .await
        .expect("resolved frame");
    assert_eq!(frame.id.as_deref(), Some("a1"));
    assert_eq!(registry.pending_count(), 0);
}

#[tokio::test]
async fn second_resolution_has_no_effect() {
    let registry = CorrelationRegistry::new();
    let pending = registry.register("a1").expect("register");

    let mut first = response("a1");
    first.command = Some("/list".into());
    assert!(registry.resolve("a1", first));
    assert!(!registry.resolve("a1", response("a1")));

    let frame = pending.wait(Duration::from_secs(1)).await.expect("frame");
    assert_eq!(frame.command.as_deref(), Some("/list"), "first resolution wins");
}

#[tokio::test]
async fn duplicate_pending_id_is_rejected() {
    let registry = CorrelationRegistry::new();
    let _pending = registry.register("dup").expect("register");

    let err = registry.register("dup").expect_err("duplicate");

    assert!(matches!(err, AppError::DuplicateId(_)));
    assert_eq!(registry.pending_count(), 1);
}

#[tokio::test]
async fn id_can_be_reused_after_resolution() {
    let registry = CorrelationRegistry::new();
    let pending = registry.register("r").expect("register");
    registry.resolve("r", response("r"));
    pending.wait(Duration::from_secs(1)).await.expect("frame");

    assert!(registry.register("r").is_ok());
}

#[tokio::test(start_paused = true)]
async fn timeout_removes_entry_and_late_response_is_dropped() {
    let registry = CorrelationRegistry::new();
    let pending = registry.register("slow").expect("register");

    let err = pending
        .wait(Duration::from_secs(2))
        .await
        .expect_err("no response arrives");

    assert!(matches!(err, AppError::ResponseTimeout(_)));
    assert!(!registry.contains("slow"));
    assert!(
        !registry.resolve("slow", response("slow")),
        "late response must be dropped"
    );
}

#[tokio::test(start_paused = true)]
async fn timeout_of_one_request_leaves_others_pending() {
    let registry = CorrelationRegistry::new();
    let short = registry.register("short").expect("register");
    let long = registry.register("long").expect("register");

    let err = short.wait(Duration::from_millis(100)).await.expect_err("times out");
    assert!(matches!(err, AppError::ResponseTimeout(_)));

    assert!(registry.contains("long"));
    assert!(registry.resolve("long", response("long")));
    long.wait(Duration::from_secs(5)).await.expect("still resolvable");
}

#[tokio::test]
async fn dropping_a_pending_request_unregisters_it() {
    let registry = CorrelationRegistry::new();
    let pending = registry.register("gone").expect("register");

    drop(pending);

    assert_eq!(registry.pending_count(), 0);
}

#[tokio::test]
async fn stale_handle_does_not_remove_a_newer_registration() {
    let registry = CorrelationRegistry::new();
    let old = registry.register("x").expect("register");
    registry.resolve("x", response("x"));
    let _new = registry.register("x").expect("re-register");

    drop(old);

    assert!(registry.contains("x"), "newer entry survives the old handle");
}

#[tokio::test]
async fn close_fails_waiters_and_later_registrations() {
    let registry = CorrelationRegistry::new();
    let a = registry.register("a").expect("register");
    let b = registry.register("b").expect("register");

    assert_eq!(registry.close(), 2);

    for pending in [a, b] {
        let err = pending.wait(Duration::from_secs(1)).await.expect_err("closed");
        assert!(matches!(err, AppError::ClientClosed(_)));
    }
    assert!(matches!(
        registry.register("c"),
        Err(AppError::ClientClosed(_))
    ));
    assert_eq!(registry.close(), 0, "close is idempotent");
}

#[tokio::test]
async fn out_of_order_resolution_only_wakes_the_matching_waiter() {
    let registry = CorrelationRegistry::new();
    let a1 = registry.register("a1").expect("register");
    let a2 = registry.register("a2").expect("register");

    registry.resolve("a2", response("a2"));

    let frame = a2.wait(Duration::from_secs(1)).await.expect("a2 resolves");
    assert_eq!(frame.id.as_deref(), Some("a2"));
    assert!(registry.contains("a1"), "a1 remains pending");

    registry.resolve("a1", response("a1"));
    a1.wait(Duration::from_secs(1)).await.expect("a1 resolves");
}
