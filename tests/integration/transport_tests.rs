//! Integration tests for the reconnecting transport state machine.
//!
//! All tests run on paused time so reconnect delays are exact and instant.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;

use agent_comm::listeners::Handler;
use agent_comm::transport::{ConnectionState, EventKind, Reconnect, Transport, TransportEvent};
use agent_comm::AppError;

use super::test_helpers::{
    default_policy, next_close, next_event_of, record_events, ScriptedConnector, Step, TEST_URL,
};

fn scheduled(attempt: u32) -> Reconnect {
    Reconnect::Scheduled {
        attempt,
        delay: Duration::from_millis(3000),
    }
}

// ── Reconnect policy ────────────────────────────────────────────────────────

/// With a ceiling of 3, an unreachable peer sees the initial attempt plus
/// three reconnects spaced by the constant delay, then nothing more.
#[tokio::test(start_paused = true)]
async fn unreachable_peer_gets_bounded_attempts() {
    let (connector, _peers) = ScriptedConnector::new([]);
    let transport = Transport::new(TEST_URL, connector.clone(), default_policy());
    let mut events = record_events(&transport);

    let started = Instant::now();
    transport.connect();

    for attempt in 1..=3 {
        assert_eq!(next_close(&mut events).await, scheduled(attempt));
        assert_eq!(transport.state(), ConnectionState::Closed);
    }
    assert_eq!(next_close(&mut events).await, Reconnect::Exhausted);

    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_millis(9000) && elapsed < Duration::from_millis(9100),
        "three reconnects must take three delays, took {elapsed:?}"
    );
    assert_eq!(connector.attempts(), 4);
    assert_eq!(transport.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 4, "no attempts after exhaustion");
}

/// Each failed attempt reports an error before its close.
#[tokio::test(start_paused = true)]
async fn refused_attempt_emits_error_then_close() {
    let (connector, _peers) = ScriptedConnector::new([]);
    let transport = Transport::new(TEST_URL, connector, default_policy());
    let mut events = record_events(&transport);

    transport.connect();

    let first = events.recv().await.expect("event");
    let second = events.recv().await.expect("event");
    assert!(
        matches!(&first, TransportEvent::Error(msg) if msg.contains("connection refused")),
        "got {first:?}"
    );
    assert_eq!(second, TransportEvent::Close(scheduled(1)));
}

/// After exhaustion, an explicit connect makes exactly one more attempt.
#[tokio::test(start_paused = true)]
async fn explicit_connect_after_exhaustion_tries_once() {
    let (connector, _peers) = ScriptedConnector::new([]);
    let transport = Transport::new(TEST_URL, connector.clone(), default_policy());
    let mut events = record_events(&transport);

    transport.connect();
    while next_close(&mut events).await != Reconnect::Exhausted {}
    assert_eq!(connector.attempts(), 4);

    transport.connect();
    assert_eq!(next_close(&mut events).await, Reconnect::Exhausted);
    assert_eq!(connector.attempts(), 5);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 5);
}

/// An explicit connect during the backoff delay counts toward the ceiling,
/// and the timer armed before it never fires an extra attempt.
#[tokio::test(start_paused = true)]
async fn explicit_connect_during_backoff_keeps_ceiling() {
    let (connector, _peers) = ScriptedConnector::new([]);
    let transport = Transport::new(TEST_URL, connector.clone(), default_policy());
    let mut events = record_events(&transport);

    transport.connect();
    assert_eq!(next_close(&mut events).await, scheduled(1));

    tokio::time::sleep(Duration::from_secs(1)).await;
    transport.connect();
    assert_eq!(next_close(&mut events).await, scheduled(2));
    assert_eq!(connector.attempts(), 2);

    assert_eq!(next_close(&mut events).await, scheduled(3));
    assert_eq!(next_close(&mut events).await, Reconnect::Exhausted);
    assert_eq!(connector.attempts(), 4);
    assert_eq!(transport.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 4, "no attempts after exhaustion");
    assert_eq!(transport.state(), ConnectionState::Disconnected);
}

/// A successful open resets the attempt counter.
#[tokio::test(start_paused = true)]
async fn successful_open_resets_attempt_counter() {
    let (connector, mut peers) =
        ScriptedConnector::new([Step::Refuse, Step::Refuse, Step::Accept]);
    let transport = Transport::new(TEST_URL, connector, default_policy());
    let mut events = record_events(&transport);

    transport.connect();
    assert_eq!(next_close(&mut events).await, scheduled(1));
    assert_eq!(next_close(&mut events).await, scheduled(2));
    next_event_of(&mut events, EventKind::Open).await;

    assert_eq!(transport.state(), ConnectionState::Open);
    assert_eq!(transport.reconnect_attempts(), 0);

    let peer = peers.recv().await.expect("accepted peer");
    drop(peer);
    assert_eq!(
        next_close(&mut events).await,
        scheduled(1),
        "the counter starts over after an open"
    );
}

/// `close()` is handled like any disconnect and triggers a reconnect.
#[tokio::test(start_paused = true)]
async fn close_request_schedules_reconnect() {
    let (connector, mut peers) = ScriptedConnector::new([Step::Accept, Step::Accept]);
    let transport = Transport::new(TEST_URL, connector.clone(), default_policy());
    let mut events = record_events(&transport);

    transport.connect();
    next_event_of(&mut events, EventKind::Open).await;
    let _first = peers.recv().await.expect("first peer");

    transport.close();
    assert_eq!(next_close(&mut events).await, scheduled(1));

    next_event_of(&mut events, EventKind::Open).await;
    assert!(peers.recv().await.is_some(), "second connection must be made");
    assert_eq!(connector.attempts(), 2);
}

/// A stream fault reports an error, then runs the reconnect policy.
#[tokio::test(start_paused = true)]
async fn stream_fault_emits_error_and_close() {
    let (connector, mut peers) = ScriptedConnector::new([Step::Accept]);
    let transport = Transport::new(TEST_URL, connector, default_policy());
    let mut events = record_events(&transport);

    transport.connect();
    next_event_of(&mut events, EventKind::Open).await;
    let peer = peers.recv().await.expect("peer");

    peer.fail("reset by peer");

    match next_event_of(&mut events, EventKind::Error).await {
        TransportEvent::Error(msg) => assert!(msg.contains("reset by peer"), "got {msg}"),
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(next_close(&mut events).await, scheduled(1));
}

/// `connect()` while connecting or open does not start a second attempt.
#[tokio::test(start_paused = true)]
async fn connect_is_idempotent_while_active() {
    let (connector, mut peers) = ScriptedConnector::new([Step::Accept, Step::Accept]);
    let transport = Transport::new(TEST_URL, connector.clone(), default_policy());
    let mut events = record_events(&transport);

    transport.connect();
    transport.connect();
    next_event_of(&mut events, EventKind::Open).await;
    let _peer = peers.recv().await.expect("peer");

    transport.connect();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(connector.attempts(), 1);
    assert_eq!(transport.state(), ConnectionState::Open);
}

// ── Sending ─────────────────────────────────────────────────────────────────

/// Sending while not open drops the payload without panicking.
#[tokio::test(start_paused = true)]
async fn send_while_closed_is_dropped() {
    let (connector, _peers) = ScriptedConnector::new([]);
    let transport = Transport::new(TEST_URL, connector, default_policy());

    transport.send("lost");

    match transport.try_send("lost") {
        Err(AppError::NotConnected(msg)) => assert!(msg.contains(TEST_URL), "got {msg}"),
        other => panic!("expected NotConnected, got {other:?}"),
    }
    assert_eq!(transport.state(), ConnectionState::Disconnected);
}

/// Text is sent verbatim; JSON values are serialized compactly.
#[tokio::test(start_paused = true)]
async fn payloads_are_written_as_text_frames() {
    let (connector, mut peers) = ScriptedConnector::new([Step::Accept]);
    let transport = Transport::new(TEST_URL, connector, default_policy());
    let mut events = record_events(&transport);

    transport.connect();
    next_event_of(&mut events, EventKind::Open).await;
    let mut peer = peers.recv().await.expect("peer");

    transport.send("plain text");
    transport.send(json!({"input": "hi", "thread_id": "t1"}));

    assert_eq!(peer.next_sent().await, "plain text");
    assert_eq!(peer.next_sent().await, r#"{"input":"hi","thread_id":"t1"}"#);
}

/// Frames queued just before `close()` are written before the sink closes.
#[tokio::test(start_paused = true)]
async fn queued_frames_are_flushed_on_close() {
    let (connector, mut peers) = ScriptedConnector::new([Step::Accept]);
    let transport = Transport::new(TEST_URL, connector, default_policy());
    let mut events = record_events(&transport);

    transport.connect();
    next_event_of(&mut events, EventKind::Open).await;
    let mut peer = peers.recv().await.expect("peer");

    transport.try_send("first").expect("open");
    transport.try_send("second").expect("open");
    transport.close();

    assert_eq!(next_close(&mut events).await, scheduled(1));
    assert_eq!(peer.next_sent().await, "first");
    assert_eq!(peer.next_sent().await, "second");
}

// ── Inbound delivery ────────────────────────────────────────────────────────

/// Raw callbacks run before `message` subscribers, and a panicking callback
/// does not stop delivery.
#[tokio::test(start_paused = true)]
async fn raw_handlers_run_before_message_events() {
    let (connector, mut peers) = ScriptedConnector::new([Step::Accept]);
    let transport = Transport::new(TEST_URL, connector, default_policy());
    let mut events = record_events(&transport);
    let order = Arc::new(Mutex::new(Vec::new()));

    let event_order = Arc::clone(&order);
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let on_event: Handler<TransportEvent> = Arc::new(move |event: &TransportEvent| {
        if let TransportEvent::Message(frame) = event {
            event_order.lock().unwrap().push(format!("event:{frame}"));
            let _ = done_tx.send(());
        }
    });
    transport.on(EventKind::Message, on_event);

    transport.on_message(Arc::new(|_: &String| panic!("raw handler failure")));
    let raw_order = Arc::clone(&order);
    transport.on_message(Arc::new(move |frame: &String| {
        raw_order.lock().unwrap().push(format!("raw:{frame}"));
    }));

    transport.connect();
    next_event_of(&mut events, EventKind::Open).await;
    let peer = peers.recv().await.expect("peer");

    peer.push("hello");
    done_rx.recv().await.expect("message event");

    assert_eq!(*order.lock().unwrap(), vec!["raw:hello", "event:hello"]);
}

/// Removed raw callbacks no longer receive frames.
#[tokio::test(start_paused = true)]
async fn removed_raw_handler_is_not_called() {
    let (connector, mut peers) = ScriptedConnector::new([Step::Accept]);
    let transport = Transport::new(TEST_URL, connector, default_policy());
    let mut events = record_events(&transport);
    let seen = Arc::new(Mutex::new(Vec::<String>::new()));

    let sink = Arc::clone(&seen);
    let handler: Handler<String> = Arc::new(move |frame: &String| {
        sink.lock().unwrap().push(frame.clone());
    });
    transport.on_message(Arc::clone(&handler));
    assert!(transport.remove_message_handler(&handler));

    transport.connect();
    next_event_of(&mut events, EventKind::Open).await;
    let peer = peers.recv().await.expect("peer");
    peer.push("ignored");
    next_event_of(&mut events, EventKind::Message).await;

    assert!(seen.lock().unwrap().is_empty());
}

// ── Single-reply helper ─────────────────────────────────────────────────────

/// The first inbound frame after sending wins, whatever it is, and the
/// temporary subscription is removed afterwards.
#[tokio::test(start_paused = true)]
async fn send_with_reply_takes_first_frame() {
    let (connector, mut peers) = ScriptedConnector::new([Step::Accept]);
    let transport = Transport::new(TEST_URL, connector, default_policy());
    let mut events = record_events(&transport);

    transport.connect();
    next_event_of(&mut events, EventKind::Open).await;
    let mut peer = peers.recv().await.expect("peer");
    let baseline = transport.subscriber_count(EventKind::Message);

    let requester = transport.clone();
    let pending = tokio::spawn(async move { requester.send_with_reply("request").await });

    assert_eq!(peer.next_sent().await, "request");
    peer.push("unrelated broadcast");
    peer.push("actual answer");

    let reply = pending.await.expect("task").expect("reply");
    assert_eq!(reply, "unrelated broadcast");
    assert_eq!(transport.subscriber_count(EventKind::Message), baseline);
}

/// Without an open connection the helper fails immediately.
#[tokio::test(start_paused = true)]
async fn send_with_reply_fails_when_closed() {
    let (connector, _peers) = ScriptedConnector::new([]);
    let transport = Transport::new(TEST_URL, connector, default_policy());

    let result = transport.send_with_reply("request").await;

    assert!(matches!(result, Err(AppError::NotConnected(_))));
    assert_eq!(transport.subscriber_count(EventKind::Message), 0);
}

/// Subscriptions can be removed by identity.
#[tokio::test(start_paused = true)]
async fn off_removes_subscription() {
    let (connector, _peers) = ScriptedConnector::new([]);
    let transport = Transport::new(TEST_URL, connector, default_policy());
    let handler: Handler<TransportEvent> = Arc::new(|_: &TransportEvent| {});

    transport.on(EventKind::Open, Arc::clone(&handler));
    assert_eq!(transport.subscriber_count(EventKind::Open), 1);
    assert!(!transport.off(EventKind::Close, &handler), "wrong kind");
    assert!(transport.off(EventKind::Open, &handler));
    assert_eq!(transport.subscriber_count(EventKind::Open), 0);
}
