//! `Stats` backend that feeds [`RelayMetrics`].
//!
//! Outcomes are first-writer-wins: once a call is marked succeeded or
//! failed, later outcome calls are ignored. `end` is idempotent.

use std::sync::Arc;
use std::time::Instant;

use relaystats_core::{CallFrame, CallStats, Peer, Stats};

use super::metrics::RelayMetrics;

#[derive(Clone)]
pub struct MetricsStats {
    metrics: Arc<RelayMetrics>,
}

impl MetricsStats {
    pub fn new(metrics: Arc<RelayMetrics>) -> Self {
        Self { metrics }
    }
}

impl Stats for MetricsStats {
    fn begin(&self, frame: &CallFrame) -> Box<dyn CallStats> {
        self.metrics.calls_in_flight.inc(&edge_labels(frame));
        Box::new(MetricsCallStats {
            frame: frame.clone(),
            metrics: Arc::clone(&self.metrics),
            started: Instant::now(),
            outcome: None,
            peer: None,
            ended: false,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure(String),
}

pub struct MetricsCallStats {
    frame: CallFrame,
    metrics: Arc<RelayMetrics>,
    started: Instant,
    outcome: Option<Outcome>,
    peer: Option<Peer>,
    ended: bool,
}

impl MetricsCallStats {
    fn record_outcome(&mut self, outcome: Outcome) {
        if self.ended {
            return;
        }
        if let Some(first) = &self.outcome {
            tracing::trace!(
                edge = %self.frame.edge_key(),
                first = ?first,
                ignored = ?outcome,
                "outcome already recorded"
            );
            return;
        }
        self.outcome = Some(outcome);
    }
}

fn edge_labels(frame: &CallFrame) -> [(&str, &str); 3] {
    [
        ("caller", frame.caller()),
        ("callee", frame.callee()),
        ("procedure", frame.procedure()),
    ]
}

impl CallStats for MetricsCallStats {
    fn succeeded(&mut self) {
        self.record_outcome(Outcome::Success);
    }

    fn failed(&mut self, reason: &str) {
        self.record_outcome(Outcome::Failure(reason.to_string()));
    }

    fn set_peer(&mut self, peer: Peer) {
        if !self.ended {
            self.peer = Some(peer);
        }
    }

    fn end(&mut self) {
        if self.ended {
            tracing::trace!(edge = %self.frame.edge_key(), "call already ended");
            return;
        }
        self.ended = true;

        let edge = edge_labels(&self.frame);
        let [caller, callee, procedure] = edge;
        let elapsed = self.started.elapsed();

        self.metrics.calls_in_flight.dec(&edge);
        self.metrics.call_duration.observe(&edge, elapsed);

        let outcome = match &self.outcome {
            Some(Outcome::Success) => "success",
            Some(Outcome::Failure(reason)) => {
                self.metrics
                    .call_failures
                    .inc(&[caller, callee, procedure, ("reason", reason.as_str())]);
                "failure"
            }
            None => "unknown",
        };
        self.metrics
            .calls
            .inc(&[caller, callee, procedure, ("outcome", outcome)]);

        if let Some(peer) = &self.peer {
            self.metrics
                .call_peers
                .inc(&[caller, callee, procedure, ("peer", peer.host_port())]);
        }

        tracing::debug!(
            edge = %self.frame.edge_key(),
            outcome,
            peer = ?self.peer.as_ref().map(Peer::host_port),
            elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            "call ended"
        );
    }
}
