//! The recorder must not compare until every in-flight call has ended,
//! even when calls end on other threads racing the assertion.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::Rng;

use relaystats_core::{CallFrame, CallGuard, Peer, Recorder, Stats};

const CALLS: usize = 32;

#[test]
fn assert_waits_for_racing_ends() {
    let actual = Arc::new(Recorder::new());
    let expected = Recorder::new();

    let mut handles = Vec::with_capacity(CALLS);
    for i in 0..CALLS {
        let frame = CallFrame::new("gateway", "billing", "Charge");
        let mut cs = actual.begin(&frame);
        expected.add("gateway", "billing", "Charge").succeeded().end();

        let delay = rand::thread_rng().gen_range(0..20);
        handles.push(thread::spawn(move || {
            thread::sleep(Duration::from_millis(delay));
            cs.set_peer(Peer::new(format!("10.0.0.{i}:4040")));
            cs.succeeded();
            cs.end();
        }));
    }

    // No join before asserting: the recorder has to wait on its own.
    actual.assert_equal(&expected);

    let snap = actual.snapshot();
    assert_eq!(snap.pending, 0);
    let calls = snap.edges.values().next().unwrap();
    assert_eq!(calls.len(), CALLS);
    assert!(calls.iter().all(|c| c.ended == 1));

    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn concurrent_begins_across_edges() {
    let actual = Arc::new(Recorder::new());
    let expected = Recorder::new();
    let callees = ["billing", "ledger", "users", "search"];

    for callee in callees {
        for _ in 0..8 {
            expected.add("gateway", callee, "Get").failed("timeout").end();
        }
    }

    let handles: Vec<_> = callees
        .iter()
        .map(|callee| {
            let stats: Arc<dyn Stats> = actual.clone();
            let callee = callee.to_string();
            thread::spawn(move || {
                for _ in 0..8 {
                    let delay = rand::thread_rng().gen_range(0..5);
                    let mut guard =
                        CallGuard::begin(stats.as_ref(), &CallFrame::new("gateway", &callee, "Get"));
                    thread::sleep(Duration::from_millis(delay));
                    guard.failed("timeout");
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    actual.assert_equal(&expected);
}

#[test]
fn bounded_assert_passes_once_calls_land() {
    let actual = Arc::new(Recorder::new());
    let expected = Recorder::new();
    expected.add("gateway", "billing", "Charge").succeeded().end();

    let call = actual.add("gateway", "billing", "Charge");
    let h = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        call.succeeded().end();
    });

    actual.assert_equal_within(&expected, Duration::from_secs(5));
    h.join().unwrap();
}
