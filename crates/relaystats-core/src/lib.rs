//! relaystats core: call identity types, the `Stats`/`CallStats` contracts,
//! and the in-memory call-graph recorder used to verify a relay's
//! instrumentation.
//!
//! This crate carries no runtime or transport dependencies so the relay,
//! metrics backends, and test suites can all share it.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. Instrumentation
//! must never bring down a relay, so every `Stats`/`CallStats` path is
//! infallible. The only deliberate panics are the recorder's `assert_*`
//! entry points, which report through the test harness.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod frame;
pub mod recorder;
pub mod stats;

/// Shared result type.
pub use error::{FailureReason, RelayStatsError, Result};
pub use frame::{CallFrame, EdgeKey, Peer};
pub use recorder::{
    CallRecord, FluentCall, GraphSnapshot, HarnessError, Mismatch, RecordedCall, Recorder,
};
pub use stats::{CallGuard, CallStats, NoopCallStats, NoopStats, Stats};
