//! Shared application state for the relay.
//!
//! Picks the stats backend from config and wires the configured services
//! into a `Relay`. Startup errors are returned, not panicked.

use std::sync::Arc;

use relaystats_core::error::Result;
use relaystats_core::{CallFrame, NoopStats, Peer, Stats};

use crate::config::RelayConfig;
use crate::forward::{Relay, Upstream};
use crate::obs::{MetricsStats, RelayMetrics};

#[derive(Clone)]
pub struct RelayState {
    inner: Arc<RelayStateInner>,
}

struct RelayStateInner {
    cfg: RelayConfig,
    relay: Relay,
    metrics: Option<Arc<RelayMetrics>>,
}

impl RelayState {
    /// Build state with the stats backend selected by `stats.enabled`.
    pub fn new(cfg: RelayConfig, upstream: Arc<dyn Upstream>) -> Result<Self> {
        let metrics = cfg.stats.enabled.then(|| Arc::new(RelayMetrics::new()));
        let stats: Arc<dyn Stats> = match &metrics {
            Some(m) => Arc::new(MetricsStats::new(Arc::clone(m))),
            None => {
                tracing::info!("stats disabled, using no-op backend");
                Arc::new(NoopStats::new())
            }
        };

        Self::with_stats(cfg, stats, upstream, metrics)
    }

    /// Build state around a caller-provided stats backend (e.g. a recorder).
    pub fn with_stats(
        cfg: RelayConfig,
        stats: Arc<dyn Stats>,
        upstream: Arc<dyn Upstream>,
        metrics: Option<Arc<RelayMetrics>>,
    ) -> Result<Self> {
        cfg.validate()?;

        let relay = Relay::new(stats, upstream, cfg.relay.call_timeout());
        for svc in &cfg.services {
            let peers = svc.peers.iter().map(|p| Peer::new(p.as_str())).collect();
            relay.register_service(svc.name.clone(), peers);
            tracing::debug!(service = %svc.name, peers = svc.peers.len(), "service registered");
        }

        Ok(Self {
            inner: Arc::new(RelayStateInner { cfg, relay, metrics }),
        })
    }

    pub fn cfg(&self) -> &RelayConfig {
        &self.inner.cfg
    }

    pub fn relay(&self) -> &Relay {
        &self.inner.relay
    }

    /// Frame for a call this relay makes on its own behalf.
    pub fn frame(&self, callee: &str, procedure: &str) -> CallFrame {
        CallFrame::new(self.inner.cfg.relay.name.as_str(), callee, procedure)
    }

    pub fn metrics(&self) -> Option<Arc<RelayMetrics>> {
        self.inner.metrics.clone()
    }

    /// Prometheus text for the metrics backend, if enabled.
    pub fn render_metrics(&self) -> Option<String> {
        self.inner.metrics.as_ref().map(|m| m.render())
    }
}
