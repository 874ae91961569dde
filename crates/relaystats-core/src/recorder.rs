//! In-memory call-graph recorder.
//!
//! A `Recorder` is a `Stats` backend that keeps the full history of every
//! call, grouped by edge in arrival order. Tests build a second recorder
//! describing the expected graph with [`Recorder::add`] and compare the two
//! with [`Recorder::assert_equal`], which first blocks until every call on
//! the actual side has ended.
//!
//! Unlike a production backend, nothing here is first-writer-wins: calling
//! `succeeded()` then `failed("x")` records both, so a test can see exactly
//! what the relay did.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use crate::frame::{CallFrame, EdgeKey, Peer};
use crate::stats::{CallStats, Stats};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // A poisoned record is still worth comparing; the panic that poisoned it
    // has already failed the test.
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counting completion signal: `add` per call, `done` on its first `end`,
/// `wait` blocks until the count is zero.
#[derive(Default)]
struct WaitGroup {
    count: Mutex<usize>,
    cvar: Condvar,
}

impl WaitGroup {
    fn add(&self) {
        *lock(&self.count) += 1;
    }

    fn done(&self) {
        let mut count = lock(&self.count);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.cvar.notify_all();
        }
    }

    fn pending(&self) -> usize {
        *lock(&self.count)
    }

    fn wait(&self) {
        let mut count = lock(&self.count);
        while *count != 0 {
            tracing::debug!(pending = *count, "waiting for in-flight calls to end");
            count = self.cvar.wait(count).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Returns the number of calls still in flight if `timeout` elapses first.
    fn wait_timeout(&self, timeout: Duration) -> std::result::Result<(), usize> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return Ok(());
        };
        let mut count = lock(&self.count);
        while *count != 0 {
            let now = Instant::now();
            if now >= deadline {
                return Err(*count);
            }
            let (guard, _) = self
                .cvar
                .wait_timeout(count, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            count = guard;
        }
        Ok(())
    }
}

/// Everything recorded for one call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CallRecord {
    pub succeeded: usize,
    pub failures: Vec<String>,
    pub ended: usize,
    pub peer: Option<Peer>,
    /// Set by `set_peer`; an expectation without it does not compare peers.
    pub peer_checked: bool,
}

impl CallRecord {
    fn declares_outcome(&self) -> bool {
        self.succeeded > 0 || !self.failures.is_empty()
    }
}

/// Handle to one call registered on a [`Recorder`]. This is the
/// `CallStats` the recorder hands to the relay.
pub struct RecordedCall {
    edge: EdgeKey,
    record: Arc<Mutex<CallRecord>>,
    pending: Arc<WaitGroup>,
}

impl CallStats for RecordedCall {
    fn succeeded(&mut self) {
        lock(&self.record).succeeded += 1;
    }

    fn failed(&mut self, reason: &str) {
        lock(&self.record).failures.push(reason.to_string());
    }

    fn set_peer(&mut self, peer: Peer) {
        let mut rec = lock(&self.record);
        rec.peer = Some(peer);
        rec.peer_checked = true;
    }

    fn end(&mut self) {
        let ended = {
            let mut rec = lock(&self.record);
            rec.ended += 1;
            rec.ended
        };
        if ended == 1 {
            self.pending.done();
        } else {
            tracing::warn!(edge = %self.edge, ended, "call ended more than once");
        }
    }
}

/// Chainable wrapper over [`RecordedCall`] for declaring calls in tests:
///
/// ```
/// # use relaystats_core::{Peer, Recorder};
/// let expected = Recorder::new();
/// expected
///     .add("gateway", "billing", "Charge")
///     .succeeded()
///     .set_peer(Peer::new("10.0.0.5:4040"))
///     .end();
/// ```
pub struct FluentCall {
    call: RecordedCall,
}

impl FluentCall {
    pub fn succeeded(mut self) -> Self {
        self.call.succeeded();
        self
    }

    pub fn failed(mut self, reason: &str) -> Self {
        self.call.failed(reason);
        self
    }

    pub fn set_peer(mut self, peer: Peer) -> Self {
        self.call.set_peer(peer);
        self
    }

    pub fn end(mut self) -> Self {
        self.call.end();
        self
    }

    pub fn into_inner(self) -> RecordedCall {
        self.call
    }
}

/// A divergence between the expected and actual call graphs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Mismatch {
    #[error(
        "calls along unexpected edges (missing: [{}], unexpected: [{}])",
        join_edges(.missing),
        join_edges(.unexpected)
    )]
    UnexpectedEdges {
        missing: Vec<EdgeKey>,
        unexpected: Vec<EdgeKey>,
    },
    #[error("unexpected number of calls along {edge} edge: expected {expected}, got {actual}")]
    CallCount {
        edge: EdgeKey,
        expected: usize,
        actual: usize,
    },
    #[error("{edge} call #{index}: unexpected number of successes: expected {expected}, got {actual}")]
    Successes {
        edge: EdgeKey,
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("{edge} call #{index}: unexpected reasons for failure: expected {expected:?}, got {actual:?}")]
    FailureReasons {
        edge: EdgeKey,
        index: usize,
        expected: Vec<String>,
        actual: Vec<String>,
    },
    #[error("{edge} call #{index}: unexpected number of calls to end: expected {expected}, got {actual}")]
    EndCount {
        edge: EdgeKey,
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("{edge} call #{index}: unexpected peer: expected {expected:?}, got {actual:?}")]
    Peer {
        edge: EdgeKey,
        index: usize,
        expected: Option<Peer>,
        actual: Option<Peer>,
    },
}

fn join_edges(edges: &[EdgeKey]) -> String {
    edges
        .iter()
        .map(EdgeKey::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// The expected graph itself is malformed, or the comparison never ran.
/// Distinct from [`Mismatch`]: this is a bug in the test, not in the relay.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HarnessError {
    #[error("expected call #{index} along {edge} must end exactly once, ended {ended} times")]
    EndCount {
        edge: EdgeKey,
        index: usize,
        ended: usize,
    },
    #[error("expected call #{index} along {edge} must declare whether it succeeds or fails")]
    NoOutcome { edge: EdgeKey, index: usize },
    #[error("{pending} call(s) still in flight after {waited:?}")]
    Timeout { pending: usize, waited: Duration },
}

/// Point-in-time copy of a recorder's graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphSnapshot {
    pub edges: BTreeMap<EdgeKey, Vec<CallRecord>>,
    pub pending: usize,
}

impl fmt::Display for GraphSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string_pretty(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "{self:?}"),
        }
    }
}

type Graph = BTreeMap<EdgeKey, Vec<Arc<Mutex<CallRecord>>>>;

/// Call-graph recorder: a `Stats` backend that aggregates calls per edge.
///
/// Scope one recorder to one test (or one relay instance) and discard it
/// afterwards; records are never removed.
#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Graph>,
    pending: Arc<WaitGroup>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one more call along `caller -> callee :: procedure`.
    pub fn add(&self, caller: &str, callee: &str, procedure: &str) -> FluentCall {
        self.pending.add();
        let edge = EdgeKey::new(caller, callee, procedure);
        let record = Arc::new(Mutex::new(CallRecord::default()));
        lock(&self.calls)
            .entry(edge.clone())
            .or_default()
            .push(Arc::clone(&record));
        FluentCall {
            call: RecordedCall {
                edge,
                record,
                pending: Arc::clone(&self.pending),
            },
        }
    }

    /// Calls registered but not yet ended.
    pub fn pending(&self) -> usize {
        self.pending.pending()
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        snapshot_of(&lock(&self.calls), self.pending())
    }

    /// Waits for every call on this recorder to end, then compares it
    /// against `expected`.
    pub fn diff(&self, expected: &Recorder) -> std::result::Result<Vec<Mismatch>, HarnessError> {
        self.pending.wait();
        self.compare(expected)
    }

    /// Like [`Recorder::diff`] but gives up after `timeout`.
    pub fn diff_within(
        &self,
        expected: &Recorder,
        timeout: Duration,
    ) -> std::result::Result<Vec<Mismatch>, HarnessError> {
        self.pending
            .wait_timeout(timeout)
            .map_err(|pending| HarnessError::Timeout {
                pending,
                waited: timeout,
            })?;
        self.compare(expected)
    }

    /// Asserts both recorders describe the same call graph. Blocks until
    /// every call on `self` has ended.
    #[track_caller]
    pub fn assert_equal(&self, expected: &Recorder) {
        let res = self.diff(expected);
        self.report(expected, res);
    }

    /// Like [`Recorder::assert_equal`] but fails if calls are still in
    /// flight after `timeout`.
    #[track_caller]
    pub fn assert_equal_within(&self, expected: &Recorder, timeout: Duration) {
        let res = self.diff_within(expected, timeout);
        self.report(expected, res);
    }

    #[track_caller]
    #[allow(clippy::panic)]
    fn report(
        &self,
        expected: &Recorder,
        res: std::result::Result<Vec<Mismatch>, HarnessError>,
    ) {
        let mismatches = match res {
            Ok(m) if m.is_empty() => return,
            Ok(m) => m,
            Err(e) => panic!("harness misuse: {e}"),
        };

        let mut msg = String::from("relayed call graph does not match expectation:\n");
        for m in &mismatches {
            let _ = writeln!(msg, "  - {m}");
        }
        let _ = write!(
            msg,
            "\nExpected relayed stats were:\n{}\nActual relayed stats were:\n{}\n",
            expected.snapshot(),
            self.snapshot()
        );
        panic!("{msg}");
    }

    fn compare(&self, expected: &Recorder) -> std::result::Result<Vec<Mismatch>, HarnessError> {
        if std::ptr::eq(self, expected) {
            let graph = lock(&self.calls);
            return compare_graphs(&graph, &graph);
        }

        // Lock in address order so two assertions running in opposite
        // directions cannot deadlock.
        let (actual, expected) = if (self as *const Recorder) < (expected as *const Recorder) {
            let a = lock(&self.calls);
            let e = lock(&expected.calls);
            (a, e)
        } else {
            let e = lock(&expected.calls);
            let a = lock(&self.calls);
            (a, e)
        };
        compare_graphs(&expected, &actual)
    }
}

impl Stats for Recorder {
    fn begin(&self, frame: &CallFrame) -> Box<dyn CallStats> {
        Box::new(
            self.add(frame.caller(), frame.callee(), frame.procedure())
                .into_inner(),
        )
    }
}

fn snapshot_of(graph: &Graph, pending: usize) -> GraphSnapshot {
    let edges = graph
        .iter()
        .map(|(edge, calls)| (edge.clone(), calls.iter().map(|c| lock(c).clone()).collect()))
        .collect();
    GraphSnapshot { edges, pending }
}

fn compare_graphs(
    expected: &Graph,
    actual: &Graph,
) -> std::result::Result<Vec<Mismatch>, HarnessError> {
    let expected = snapshot_of(expected, 0).edges;
    let actual = snapshot_of(actual, 0).edges;

    for (edge, calls) in &expected {
        for (index, call) in calls.iter().enumerate() {
            if call.ended != 1 {
                return Err(HarnessError::EndCount {
                    edge: edge.clone(),
                    index,
                    ended: call.ended,
                });
            }
            if !call.declares_outcome() {
                return Err(HarnessError::NoOutcome {
                    edge: edge.clone(),
                    index,
                });
            }
        }
    }

    let mut out = Vec::new();

    let missing: Vec<EdgeKey> = expected
        .keys()
        .filter(|k| !actual.contains_key(*k))
        .cloned()
        .collect();
    let unexpected: Vec<EdgeKey> = actual
        .keys()
        .filter(|k| !expected.contains_key(*k))
        .cloned()
        .collect();
    if !missing.is_empty() || !unexpected.is_empty() {
        out.push(Mismatch::UnexpectedEdges {
            missing,
            unexpected,
        });
    }

    for (edge, want) in &expected {
        let Some(got) = actual.get(edge) else { continue };
        if want.len() != got.len() {
            out.push(Mismatch::CallCount {
                edge: edge.clone(),
                expected: want.len(),
                actual: got.len(),
            });
            continue;
        }
        for (index, (w, g)) in want.iter().zip(got).enumerate() {
            compare_call(edge, index, w, g, &mut out);
        }
    }

    Ok(out)
}

fn compare_call(
    edge: &EdgeKey,
    index: usize,
    want: &CallRecord,
    got: &CallRecord,
    out: &mut Vec<Mismatch>,
) {
    if want.succeeded != got.succeeded {
        out.push(Mismatch::Successes {
            edge: edge.clone(),
            index,
            expected: want.succeeded,
            actual: got.succeeded,
        });
    }
    if want.failures != got.failures {
        out.push(Mismatch::FailureReasons {
            edge: edge.clone(),
            index,
            expected: want.failures.clone(),
            actual: got.failures.clone(),
        });
    }
    if want.ended != got.ended {
        out.push(Mismatch::EndCount {
            edge: edge.clone(),
            index,
            expected: want.ended,
            actual: got.ended,
        });
    }
    if want.peer_checked && want.peer != got.peer {
        out.push(Mismatch::Peer {
            edge: edge.clone(),
            index,
            expected: want.peer.clone(),
            actual: got.peer.clone(),
        });
    }
}
