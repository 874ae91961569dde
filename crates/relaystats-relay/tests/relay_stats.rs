//! End-to-end: forward calls through the relay and compare the call graph
//! its stats produced against an expected one.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use tokio::sync::Barrier;

use relaystats_core::error::{RelayStatsError, Result};
use relaystats_core::{CallFrame, Mismatch, Peer, Recorder};
use relaystats_relay::app_state::RelayState;
use relaystats_relay::config;
use relaystats_relay::forward::{LoopbackUpstream, Upstream};

const CONFIG: &str = r#"
version: 1
relay:
  name: "gateway"
  call_timeout_ms: 50
services:
  - name: "billing"
    peers: ["10.0.0.5:4040"]
  - name: "ledger"
    peers: ["10.0.0.7:4040", "10.0.0.8:4040"]
"#;

/// Upstream whose behavior is picked by procedure name.
struct Scripted;

#[async_trait]
impl Upstream for Scripted {
    async fn call(&self, _peer: &Peer, procedure: &str, body: Bytes) -> Result<Bytes> {
        match procedure {
            "Slow" => {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(body)
            }
            "Broken" => Err(RelayStatsError::Upstream("connection reset".into())),
            "Jitter" => {
                let delay = rand::thread_rng().gen_range(0..10);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(body)
            }
            _ => Ok(body),
        }
    }
}

/// Holds every call at the upstream until all of them (and the test) have
/// arrived, then releases them with a random delay.
struct Gated {
    barrier: Arc<Barrier>,
}

#[async_trait]
impl Upstream for Gated {
    async fn call(&self, _peer: &Peer, _procedure: &str, body: Bytes) -> Result<Bytes> {
        self.barrier.wait().await;
        let delay = rand::thread_rng().gen_range(0..10);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(body)
    }
}

fn state_with(recorder: Arc<Recorder>) -> RelayState {
    let cfg = config::load_from_str(CONFIG).unwrap();
    RelayState::with_stats(cfg, recorder, Arc::new(Scripted), None).unwrap()
}

fn body() -> Bytes {
    Bytes::from_static(b"{}")
}

#[tokio::test]
async fn charge_succeeds_on_known_peer() {
    let actual = Arc::new(Recorder::new());
    let state = state_with(actual.clone());

    let frame = state.frame("billing", "Charge");
    let out = state.relay().forward(&frame, body()).await.unwrap();
    assert_eq!(out, body());

    let expected = Recorder::new();
    expected
        .add("gateway", "billing", "Charge")
        .succeeded()
        .set_peer(Peer::new("10.0.0.5:4040"))
        .end();
    actual.assert_equal(&expected);

    let wrong = Recorder::new();
    wrong.add("gateway", "billing", "Charge").failed("timeout").end();
    let mismatches = actual.diff(&wrong).unwrap();
    assert!(
        mismatches.iter().any(|m| matches!(m, Mismatch::Successes { expected: 0, actual: 1, .. })),
        "{mismatches:?}"
    );
}

#[tokio::test]
async fn failures_record_their_reason() {
    let actual = Arc::new(Recorder::new());
    let state = state_with(actual.clone());

    let err = state
        .relay()
        .forward(&state.frame("billing", "Broken"), body())
        .await
        .unwrap_err();
    assert_eq!(err.reason().as_str(), "upstream");

    let err = state
        .relay()
        .forward(&state.frame("billing", "Slow"), body())
        .await
        .unwrap_err();
    assert_eq!(err.reason().as_str(), "timeout");

    let err = state
        .relay()
        .forward(&state.frame("search", "Query"), body())
        .await
        .unwrap_err();
    assert_eq!(err.reason().as_str(), "no-peers");

    let expected = Recorder::new();
    expected
        .add("gateway", "billing", "Broken")
        .failed("upstream")
        .set_peer(Peer::new("10.0.0.5:4040"))
        .end();
    expected.add("gateway", "billing", "Slow").failed("timeout").end();
    // no peer was ever resolved
    expected
        .add("gateway", "search", "Query")
        .failed("no-peers")
        .end();
    actual.assert_equal(&expected);

    let snap = actual.snapshot();
    let unresolved = &snap.edges[&CallFrame::new("gateway", "search", "Query").edge_key()];
    assert_eq!(unresolved[0].peer, None);
}

#[tokio::test]
async fn malformed_frame_is_a_bad_request() {
    let actual = Arc::new(Recorder::new());
    let state = state_with(actual.clone());

    let err = state
        .relay()
        .forward(&state.frame("", "Charge"), body())
        .await
        .unwrap_err();
    assert_eq!(err.reason().as_str(), "bad-request");

    let err = state
        .relay()
        .forward(&state.frame("billing", ""), body())
        .await
        .unwrap_err();
    assert_eq!(err.reason().as_str(), "bad-request");

    let expected = Recorder::new();
    expected.add("gateway", "", "Charge").failed("bad-request").end();
    expected.add("gateway", "billing", "").failed("bad-request").end();
    actual.assert_equal(&expected);
}

#[tokio::test]
async fn configured_services_are_registered() {
    let state = state_with(Arc::new(Recorder::new()));
    let mut services = state.relay().registered_services();
    services.sort();
    assert_eq!(services, vec!["billing", "ledger"]);
}

#[tokio::test]
async fn peers_rotate_round_robin() {
    let actual = Arc::new(Recorder::new());
    let state = state_with(actual.clone());

    for _ in 0..3 {
        state
            .relay()
            .forward(&state.frame("ledger", "Post"), body())
            .await
            .unwrap();
    }

    let expected = Recorder::new();
    for peer in ["10.0.0.7:4040", "10.0.0.8:4040", "10.0.0.7:4040"] {
        expected
            .add("gateway", "ledger", "Post")
            .succeeded()
            .set_peer(Peer::new(peer))
            .end();
    }
    actual.assert_equal(&expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn assert_waits_for_concurrent_forwards() {
    const CALLS: usize = 24;

    let actual = Arc::new(Recorder::new());
    let expected = Arc::new(Recorder::new());
    let barrier = Arc::new(Barrier::new(CALLS + 1));
    let cfg = config::load_from_str(CONFIG).unwrap();
    let upstream = Arc::new(Gated {
        barrier: barrier.clone(),
    });
    let state = RelayState::with_stats(cfg, actual.clone(), upstream, None).unwrap();

    let mut tasks = Vec::with_capacity(CALLS);
    for _ in 0..CALLS {
        expected.add("gateway", "billing", "Jitter").succeeded().end();
        let state = state.clone();
        tasks.push(tokio::spawn(async move {
            let frame = state.frame("billing", "Jitter");
            state.relay().forward(&frame, body()).await
        }));
    }

    // Every forward has begun its call once the barrier opens; the ends
    // still race the assertion below.
    barrier.wait().await;
    let (a, e) = (actual.clone(), expected.clone());
    tokio::task::spawn_blocking(move || a.assert_equal_within(&e, Duration::from_secs(10)))
        .await
        .unwrap();

    assert_eq!(actual.pending(), 0);
    for t in tasks {
        t.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn dropped_forward_still_ends_the_call() {
    let actual = Arc::new(Recorder::new());
    let state = state_with(actual.clone());

    let frame = state.frame("billing", "Slow");
    let res = tokio::time::timeout(
        Duration::from_millis(5),
        state.relay().forward(&frame, body()),
    )
    .await;
    assert!(res.is_err());

    assert_eq!(actual.pending(), 0);
    let snap = actual.snapshot();
    let call = &snap.edges[&frame.edge_key()][0];
    assert_eq!(call.ended, 1);
    assert_eq!(call.succeeded, 0);
    assert!(call.failures.is_empty());
    assert_eq!(call.peer, Some(Peer::new("10.0.0.5:4040")));
}

#[tokio::test]
async fn metrics_backend_counts_outcomes() {
    let cfg = config::load_from_str(CONFIG).unwrap();
    let state = RelayState::new(cfg, Arc::new(LoopbackUpstream::new())).unwrap();

    let frame = state.frame("billing", "Charge");
    state.relay().forward(&frame, body()).await.unwrap();
    state
        .relay()
        .forward(&state.frame("search", "Query"), body())
        .await
        .unwrap_err();

    let m = state.metrics().unwrap();
    let edge = [("caller", "gateway"), ("callee", "billing"), ("procedure", "Charge")];
    assert_eq!(
        m.calls.get(&[edge[0], edge[1], edge[2], ("outcome", "success")]),
        1
    );
    assert_eq!(m.calls_in_flight.get(&edge), 0);
    assert_eq!(
        m.call_failures.get(&[
            ("caller", "gateway"),
            ("callee", "search"),
            ("procedure", "Query"),
            ("reason", "no-peers"),
        ]),
        1
    );

    let text = state.render_metrics().unwrap();
    assert!(text.contains("relay_calls_total{"), "{text}");
    assert!(text.contains("relay_call_duration_micros_count{"), "{text}");
}

#[tokio::test]
async fn disabled_stats_use_noop_backend() {
    let yaml = format!("{CONFIG}stats:\n  enabled: false\n");
    let cfg = config::load_from_str(&yaml).unwrap();
    let state = RelayState::new(cfg, Arc::new(LoopbackUpstream::new())).unwrap();

    state
        .relay()
        .forward(&state.frame("billing", "Charge"), body())
        .await
        .unwrap();
    assert!(state.metrics().is_none());
    assert!(state.render_metrics().is_none());
}
