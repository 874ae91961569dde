//! Instrumentation contracts between the relay and a stats backend.
//!
//! The relay holds one `Stats` for its lifetime and calls `begin` once per
//! forwarded call. The returned `CallStats` is owned by that call path and
//! must see exactly one `end()`; wrap it in a [`CallGuard`] to get that for
//! free on every exit path.

use crate::frame::{CallFrame, Peer};

/// Factory for per-call recorders. Must never fail and must be safe to call
/// from any number of call paths at once.
pub trait Stats: Send + Sync {
    fn begin(&self, frame: &CallFrame) -> Box<dyn CallStats>;
}

/// Recorder for one in-flight call.
///
/// `succeeded`, `failed` and `set_peer` may be called any number of times,
/// in any order, before `end`. Backends decide whether the first outcome
/// wins; none of these operations may fail.
pub trait CallStats: Send {
    /// Marks the call as successful.
    fn succeeded(&mut self);
    /// Marks the call as failed for `reason`.
    fn failed(&mut self, reason: &str);
    /// Attaches the peer that served the call.
    fn set_peer(&mut self, peer: Peer);
    /// Finalizes the call: stops timers and flushes metrics.
    fn end(&mut self);
}

/// Stats backend that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStats;

impl NoopStats {
    pub fn new() -> Self {
        Self
    }
}

impl Stats for NoopStats {
    fn begin(&self, _frame: &CallFrame) -> Box<dyn CallStats> {
        // zero-sized: boxing does not allocate
        Box::new(NoopCallStats)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallStats;

impl CallStats for NoopCallStats {
    fn succeeded(&mut self) {}
    fn failed(&mut self, _reason: &str) {}
    fn set_peer(&mut self, _peer: Peer) {}
    fn end(&mut self) {}
}

/// Owns a `CallStats` and ends it exactly once: on [`CallGuard::finish`],
/// or on drop if the call path returns early or unwinds.
pub struct CallGuard {
    stats: Box<dyn CallStats>,
}

impl CallGuard {
    pub fn begin(stats: &dyn Stats, frame: &CallFrame) -> Self {
        Self {
            stats: stats.begin(frame),
        }
    }

    pub fn succeeded(&mut self) {
        self.stats.succeeded();
    }

    pub fn failed(&mut self, reason: &str) {
        self.stats.failed(reason);
    }

    pub fn set_peer(&mut self, peer: Peer) {
        self.stats.set_peer(peer);
    }

    /// Ends the call now.
    pub fn finish(self) {
        drop(self);
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.stats.end();
    }
}
