//! Unit tests for named tool events.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use agent_comm::correlator::{result_event_name, EventBus};
use agent_comm::listeners::Handler;

fn collector(seen: &Arc<Mutex<Vec<Value>>>) -> Handler<Value> {
    let seen = Arc::clone(seen);
    Arc::new(move |detail: &Value| seen.lock().unwrap().push(detail.clone()))
}

#[test]
fn result_event_name_appends_suffix() {
    assert_eq!(result_event_name("ping"), "ping_result");
}

#[test]
fn emit_reaches_only_matching_name() {
    let bus = EventBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    bus.subscribe("ping", collector(&seen));

    assert_eq!(bus.emit("ping_result", &json!(1)), 0);
    assert_eq!(bus.emit("ping", &json!(2)), 1);

    assert_eq!(*seen.lock().unwrap(), vec![json!(2)]);
}

#[test]
fn emit_without_subscribers_is_noop() {
    let bus = EventBus::new();
    assert_eq!(bus.emit("nothing", &json!({})), 0);
    assert_eq!(bus.subscriber_count("nothing"), 0);
}

#[test]
fn unsubscribe_removes_handler() {
    let bus = EventBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler = collector(&seen);
    bus.subscribe("ping", Arc::clone(&handler));
    assert_eq!(bus.subscriber_count("ping"), 1);

    assert!(bus.unsubscribe("ping", &handler));
    assert!(!bus.unsubscribe("ping", &handler));
    bus.emit("ping", &json!(1));

    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn handler_may_subscribe_during_emit() {
    let bus = Arc::new(EventBus::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let late = collector(&seen);
    let adder: Handler<Value> = {
        let bus = Arc::clone(&bus);
        Arc::new(move |_: &Value| bus.subscribe("ping", Arc::clone(&late)))
    };
    bus.subscribe("ping", adder);

    bus.emit("ping", &json!(1));
    bus.emit("ping", &json!(2));

    assert_eq!(*seen.lock().unwrap(), vec![json!(2)]);
}
