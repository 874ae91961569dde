use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::time::timeout;

use relaystats_core::error::{RelayStatsError, Result};
use relaystats_core::{CallFrame, CallGuard, Peer, Stats};

use super::upstream::Upstream;

/// Peers of one service, picked round-robin.
struct PeerSet {
    peers: Vec<Peer>,
    cursor: AtomicUsize,
}

impl PeerSet {
    fn next(&self) -> Option<Peer> {
        if self.peers.is_empty() {
            return None;
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.peers.len();
        Some(self.peers[i].clone())
    }
}

/// Forwards calls to registered services and instruments every one of
/// them through a single `Stats`.
pub struct Relay {
    stats: Arc<dyn Stats>,
    upstream: Arc<dyn Upstream>,
    services: DashMap<String, PeerSet>,
    call_timeout: Duration,
}

impl Relay {
    pub fn new(stats: Arc<dyn Stats>, upstream: Arc<dyn Upstream>, call_timeout: Duration) -> Self {
        Self {
            stats,
            upstream,
            services: DashMap::new(),
            call_timeout,
        }
    }

    /// Registers (or replaces) the peers serving `service`.
    pub fn register_service(&self, service: impl Into<String>, peers: Vec<Peer>) {
        self.services.insert(
            service.into(),
            PeerSet {
                peers,
                cursor: AtomicUsize::new(0),
            },
        );
    }

    pub fn registered_services(&self) -> Vec<String> {
        self.services.iter().map(|e| e.key().clone()).collect()
    }

    fn pick_peer(&self, service: &str) -> Option<Peer> {
        self.services.get(service).and_then(|set| set.next())
    }

    /// Forwards one call. The call's stats are ended exactly once on every
    /// path, including when this future is dropped before completing.
    pub async fn forward(&self, frame: &CallFrame, body: Bytes) -> Result<Bytes> {
        let mut call = CallGuard::begin(self.stats.as_ref(), frame);

        if frame.callee().is_empty() || frame.procedure().is_empty() {
            let err = RelayStatsError::BadRequest(format!(
                "callee and procedure are required: {}",
                frame.edge_key()
            ));
            call.failed(err.reason().as_str());
            return Err(err);
        }

        let Some(peer) = self.pick_peer(frame.callee()) else {
            let err = RelayStatsError::NoPeers(frame.callee().to_string());
            tracing::warn!(edge = %frame.edge_key(), "no peers registered for callee");
            call.failed(err.reason().as_str());
            return Err(err);
        };
        call.set_peer(peer.clone());

        let res = match timeout(
            self.call_timeout,
            self.upstream.call(&peer, frame.procedure(), body),
        )
        .await
        {
            Ok(res) => res,
            Err(_) => Err(RelayStatsError::Timeout(
                u64::try_from(self.call_timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        };

        match &res {
            Ok(_) => call.succeeded(),
            Err(e) => {
                tracing::debug!(edge = %frame.edge_key(), %peer, error = %e, "forward failed");
                call.failed(e.reason().as_str());
            }
        }
        res
    }
}
