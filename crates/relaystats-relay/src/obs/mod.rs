//! Production stats backend.
//!
//! Calls are aggregated into in-process counters, gauges and histograms
//! keyed by edge and outcome, rendered in Prometheus text format on demand.
//! Shipping them anywhere is left to the embedding process.

pub mod metrics;
pub mod stats;

pub use metrics::RelayMetrics;
pub use stats::{MetricsCallStats, MetricsStats};
