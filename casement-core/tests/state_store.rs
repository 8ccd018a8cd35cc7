use std::{sync::Arc, thread};

use casement_core::{
    bus_contract::DeviceReport,
    error::MalformedReport,
    model::{AlarmState, Ambient, DeviceId, DeviceState, LockState, Mode, WindowPosition},
    store::{StateStore, StoreEvent},
};
use tokio::sync::mpsc::UnboundedReceiver;

fn id(raw: &str) -> DeviceId {
    DeviceId::parse(raw).unwrap()
}

fn state(device: &str, revision: u64, window: WindowPosition) -> DeviceState {
    DeviceState {
        device_id: id(device),
        mode: Mode::Manual,
        window,
        lock: LockState::Engaged,
        alarm: AlarmState::Inactive,
        ambient: Ambient { temperature_celsius: 19.0, is_raining: false, is_daytime: true },
        revision,
    }
}

fn drain_revisions(rx: &mut UnboundedReceiver<StoreEvent>) -> Vec<u64> {
    let mut revisions = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            StoreEvent::Updated(state) => revisions.push(state.revision),
            StoreEvent::Removed(_) => panic!("unexpected removal"),
        }
    }
    revisions
}

#[test]
fn keeps_one_state_per_device() {
    let store = StateStore::new();
    for revision in 1..=10 {
        store.replace(&id("w1"), state("w1", revision, WindowPosition::Closed)).unwrap();
        store.replace(&id("w2"), state("w2", revision, WindowPosition::Open)).unwrap();
    }

    let devices = store.devices();
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].device_id, id("w1"));
    assert_eq!(devices[1].device_id, id("w2"));
    assert!(devices.iter().all(|s| s.revision == 10));
}

#[test]
fn increasing_revisions_leave_the_last_one_stored() {
    let store = StateStore::new();
    let w1 = id("w1");
    for revision in [1, 2, 7, 8, 20] {
        let window = if revision % 2 == 0 { WindowPosition::Open } else { WindowPosition::Closed };
        assert!(store.replace(&w1, state("w1", revision, window)).unwrap());
    }

    let stored = store.get(&w1).expect("stored state");
    assert_eq!(stored.revision, 20);
    assert_eq!(stored.window, WindowPosition::Open);
}

#[test]
fn stale_and_duplicate_reports_are_noops() {
    let store = StateStore::new();
    let w1 = id("w1");
    let (_handle, mut rx) = store.watch(&w1);

    assert!(store.replace(&w1, state("w1", 5, WindowPosition::Open)).unwrap());
    assert!(!store.replace(&w1, state("w1", 5, WindowPosition::Closed)).unwrap());
    assert!(!store.replace(&w1, state("w1", 3, WindowPosition::Closed)).unwrap());

    let stored = store.get(&w1).unwrap();
    assert_eq!(stored.revision, 5);
    assert_eq!(stored.window, WindowPosition::Open);
    assert_eq!(drain_revisions(&mut rx), vec![5]);
}

#[test]
fn replay_on_join_precedes_later_updates() {
    let store = StateStore::new();
    let w1 = id("w1");
    store.replace(&w1, state("w1", 1, WindowPosition::Closed)).unwrap();

    let (_handle, mut rx) = store.watch(&w1);
    store.replace(&w1, state("w1", 2, WindowPosition::Open)).unwrap();

    assert_eq!(drain_revisions(&mut rx), vec![1, 2]);
}

#[test]
fn joining_between_rapid_reports_sees_a_gapless_suffix() {
    let store = Arc::new(StateStore::new());
    let w1 = id("w1");
    store.replace(&w1, state("w1", 1, WindowPosition::Closed)).unwrap();

    let writer = {
        let store = Arc::clone(&store);
        let w1 = w1.clone();
        thread::spawn(move || {
            for revision in 2..=500 {
                store.replace(&w1, state("w1", revision, WindowPosition::Closed)).unwrap();
            }
        })
    };
    let (_handle, mut rx) = store.watch(&w1);
    writer.join().unwrap();

    let revisions = drain_revisions(&mut rx);
    assert!(!revisions.is_empty(), "joining must replay the current state");
    assert!(revisions.windows(2).all(|w| w[1] == w[0] + 1), "{revisions:?}");
    assert_eq!(revisions.last(), Some(&500));
}

#[test]
fn concurrent_reports_reach_every_subscriber_in_one_order() {
    let store = Arc::new(StateStore::new());
    let w1 = id("w1");
    let (_a, mut first) = store.watch(&w1);
    let (_b, mut second) = store.watch(&w1);

    let writers: Vec<_> = (0..4u64)
        .map(|lane| {
            let store = Arc::clone(&store);
            let w1 = w1.clone();
            thread::spawn(move || {
                for step in 0..250u64 {
                    let revision = step * 4 + lane + 1;
                    let _ = store.replace(&w1, state("w1", revision, WindowPosition::Open));
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let seen_first = drain_revisions(&mut first);
    let seen_second = drain_revisions(&mut second);
    assert!(seen_first.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(seen_first, seen_second);
    assert_eq!(seen_first.last(), Some(&1000));
    assert_eq!(store.get(&w1).unwrap().revision, 1000);
}

#[test]
fn out_of_order_reports_keep_the_newest() {
    let store = StateStore::new();
    let w1 = id("w1");
    assert!(store.replace(&w1, state("w1", 5, WindowPosition::Open)).unwrap());
    assert!(!store.replace(&w1, state("w1", 3, WindowPosition::Closed)).unwrap());

    let stored = store.get(&w1).unwrap();
    assert_eq!(stored.revision, 5);
    assert_eq!(stored.window, WindowPosition::Open);
}

#[test]
fn remove_notifies_and_keeps_subscriptions() {
    let store = StateStore::new();
    let w1 = id("w1");
    store.replace(&w1, state("w1", 9, WindowPosition::Open)).unwrap();
    let (_handle, mut rx) = store.watch(&w1);
    assert!(matches!(rx.try_recv(), Ok(StoreEvent::Updated(s)) if s.revision == 9));

    assert!(store.remove(&w1));
    assert_eq!(rx.try_recv().unwrap(), StoreEvent::Removed(w1.clone()));
    assert!(store.get(&w1).is_none());
    assert_eq!(store.subscriber_count(&w1), 1);
    assert!(!store.remove(&w1));

    // A re-registered device starts its revisions over.
    assert!(store.replace(&w1, state("w1", 1, WindowPosition::Closed)).unwrap());
    assert!(matches!(rx.try_recv(), Ok(StoreEvent::Updated(s)) if s.revision == 1));
}

#[test]
fn unsubscribe_stops_delivery() {
    let store = StateStore::new();
    let w1 = id("w1");
    let (handle, mut rx) = store.watch(&w1);
    assert_eq!(handle.device_id(), &w1);
    store.replace(&w1, state("w1", 1, WindowPosition::Closed)).unwrap();

    assert!(store.unsubscribe(&handle));
    store.replace(&w1, state("w1", 2, WindowPosition::Open)).unwrap();

    assert_eq!(drain_revisions(&mut rx), vec![1]);
    assert_eq!(store.subscriber_count(&w1), 0);
}

#[test]
fn malformed_reports_are_not_applied() {
    let store = StateStore::new();
    let w1 = id("w1");
    let mut report = DeviceReport::from(&state("w1", 1, WindowPosition::Closed));
    report.alarm = Some("ringing".into());

    let err = store.apply_report(&w1, report).unwrap_err();
    assert_eq!(err, MalformedReport::InvalidValue { field: "alarm", value: "ringing".into() });
    assert!(store.get(&w1).is_none());
}

#[test]
fn reports_delivered_under_another_device_are_rejected() {
    let store = StateStore::new();
    let err = store.replace(&id("w1"), state("w2", 1, WindowPosition::Closed)).unwrap_err();
    assert_eq!(err, MalformedReport::DeviceMismatch { expected: id("w1"), reported: id("w2") });
    assert!(store.devices().is_empty());
}
