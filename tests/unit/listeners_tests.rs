//! Unit tests for ordered callback lists.

use std::sync::{Arc, Mutex};

use agent_comm::listeners::{Handler, Listeners};

fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> Handler<u32> {
    let log = Arc::clone(log);
    let tag = tag.to_owned();
    Arc::new(move |value: &u32| log.lock().unwrap().push(format!("{tag}:{value}")))
}

#[test]
fn callbacks_run_in_registration_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let listeners = Listeners::new();
    listeners.add(recorder(&log, "a"));
    listeners.add(recorder(&log, "b"));
    listeners.add(recorder(&log, "c"));

    assert_eq!(listeners.emit(&7), 3);
    assert_eq!(*log.lock().unwrap(), vec!["a:7", "b:7", "c:7"]);
}

#[test]
fn panicking_callback_does_not_stop_delivery() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let listeners = Listeners::new();
    listeners.add(recorder(&log, "before"));
    listeners.add(Arc::new(|_: &u32| panic!("listener failure")));
    listeners.add(recorder(&log, "after"));

    let delivered = listeners.emit(&1);

    assert_eq!(delivered, 2, "the panicking callback is not counted");
    assert_eq!(*log.lock().unwrap(), vec!["before:1", "after:1"]);
}

#[test]
fn remove_matches_by_identity() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let listeners = Listeners::new();
    let kept = recorder(&log, "kept");
    let removed = recorder(&log, "removed");
    listeners.add(Arc::clone(&kept));
    listeners.add(Arc::clone(&removed));

    assert!(listeners.remove(&removed));
    assert!(!listeners.remove(&removed), "second removal finds nothing");
    listeners.emit(&2);

    assert_eq!(*log.lock().unwrap(), vec!["kept:2"]);
}

#[test]
fn duplicate_registration_runs_twice_and_removes_once() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let listeners = Listeners::new();
    let handler = recorder(&log, "dup");
    listeners.add(Arc::clone(&handler));
    listeners.add(Arc::clone(&handler));

    listeners.emit(&1);
    assert!(listeners.remove(&handler));
    listeners.emit(&2);

    assert_eq!(*log.lock().unwrap(), vec!["dup:1", "dup:1", "dup:2"]);
}

#[test]
fn callback_may_remove_itself_during_emit() {
    let listeners: Arc<Listeners<u32>> = Arc::new(Listeners::new());
    let calls = Arc::new(Mutex::new(0));
    let slot: Arc<Mutex<Option<Handler<u32>>>> = Arc::new(Mutex::new(None));

    let handler: Handler<u32> = {
        let listeners = Arc::clone(&listeners);
        let calls = Arc::clone(&calls);
        let slot = Arc::clone(&slot);
        Arc::new(move |_: &u32| {
            *calls.lock().unwrap() += 1;
            if let Some(me) = slot.lock().unwrap().take() {
                listeners.remove(&me);
            }
        })
    };
    *slot.lock().unwrap() = Some(Arc::clone(&handler));
    listeners.add(handler);

    listeners.emit(&1);
    listeners.emit(&2);

    assert_eq!(*calls.lock().unwrap(), 1);
    assert!(listeners.is_empty());
}

#[test]
fn callback_added_during_emit_waits_for_next_round() {
    let listeners: Arc<Listeners<u32>> = Arc::new(Listeners::new());
    let log = Arc::new(Mutex::new(Vec::new()));

    let adder: Handler<u32> = {
        let listeners = Arc::clone(&listeners);
        let late = recorder(&log, "late");
        Arc::new(move |_: &u32| listeners.add(Arc::clone(&late)))
    };
    listeners.add(adder);

    listeners.emit(&1);
    assert!(log.lock().unwrap().is_empty(), "snapshot excludes the new callback");

    listeners.emit(&2);
    assert_eq!(*log.lock().unwrap(), vec!["late:2"]);
    assert_eq!(listeners.len(), 3);
}
