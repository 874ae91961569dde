//! Call forwarding.
//!
//! Just enough of a relay to drive the instrumentation contract: pick a
//! peer for the callee, call it through an `Upstream`, and record the
//! outcome on the call's stats.

pub mod relay;
pub mod upstream;

pub use relay::Relay;
pub use upstream::{LoopbackUpstream, Upstream};
