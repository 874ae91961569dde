//! Top-level facade crate for relaystats.
//!
//! Re-exports the core contracts and the relay library so users can depend
//! on a single crate.

pub mod core {
    pub use relaystats_core::*;
}

pub mod relay {
    pub use relaystats_relay::*;
}
