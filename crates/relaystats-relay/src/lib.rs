//! relaystats relay library entry.
//!
//! Wires config, the stats backends, and a minimal forwarding relay. It is
//! consumed by the binary (`main.rs`) and by integration tests.

pub mod app_state;
pub mod config;
pub mod forward;
pub mod obs;
