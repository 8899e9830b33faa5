//! Subscriber table: ordering and failure isolation.

use std::sync::{Arc, Mutex};

use csend_bridge::machine::subscribers::{handler, EventCategory, Handler, SubscriberTable};
use csend_bridge::machine::{Frame, FrameKind};
use csend_bridge::AppError;

fn event(name: &str) -> Frame {
    let mut frame = Frame::new(FrameKind::Event);
    frame.event = Some(name.to_owned());
    frame
}

fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Handler {
    let log = Arc::clone(log);
    handler(move |_frame| {
        let log = Arc::clone(&log);
        async move {
            log.lock().unwrap().push(tag.to_owned());
            Ok(())
        }
    })
}

#[tokio::test]
async fn typed_then_named_then_wildcard_in_registration_order() {
    let table = SubscriberTable::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    table.subscribe(EventCategory::Any, recorder(&log, "any"));
    table.subscribe(EventCategory::Message, recorder(&log, "typed-1"));
    table.subscribe(
        EventCategory::Named("message".into()),
        recorder(&log, "named"),
    );
    table.subscribe(EventCategory::Message, recorder(&log, "typed-2"));

    let ok = table.notify(&event("message")).await;

    assert_eq!(ok, 4);
    assert_eq!(
        *log.lock().unwrap(),
        vec!["typed-1", "typed-2", "named", "any"]
    );
}

#[tokio::test]
async fn unrelated_categories_are_not_invoked() {
    let table = SubscriberTable::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    table.subscribe(EventCategory::PeerUpdate, recorder(&log, "peer"));
    table.subscribe(
        EventCategory::Named("custom".into()),
        recorder(&log, "custom"),
    );

    table.notify(&event("message")).await;

    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failing_and_panicking_subscribers_do_not_stop_the_rest() {
    let table = SubscriberTable::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    table.subscribe(
        EventCategory::PeerUpdate,
        handler(|_frame| async { Err(AppError::Protocol("boom".into())) }),
    );
    table.subscribe(
        EventCategory::PeerUpdate,
        handler(|frame: Frame| async move {
            assert!(frame.event.is_none(), "subscriber panic");
            Ok(())
        }),
    );
    table.subscribe(EventCategory::PeerUpdate, recorder(&log, "survivor"));

    let ok = table.notify(&event("peer_update")).await;

    assert_eq!(ok, 1);
    assert_eq!(*log.lock().unwrap(), vec!["survivor"]);
}

#[tokio::test]
async fn clear_removes_every_handler() {
    let table = SubscriberTable::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    table.subscribe(EventCategory::Any, recorder(&log, "any"));
    assert_eq!(table.count(&EventCategory::Any), 1);

    table.clear();

    assert_eq!(table.count(&EventCategory::Any), 0);
    assert_eq!(table.notify(&event("message")).await, 0);
}
