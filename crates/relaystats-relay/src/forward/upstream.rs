use async_trait::async_trait;
use bytes::Bytes;

use relaystats_core::error::Result;
use relaystats_core::Peer;

/// Transport to a concrete peer. The wire protocol lives behind this trait.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn call(&self, peer: &Peer, procedure: &str, body: Bytes) -> Result<Bytes>;
}

/// Answers every call in-process by echoing the body back.
#[derive(Debug, Default)]
pub struct LoopbackUpstream;

impl LoopbackUpstream {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Upstream for LoopbackUpstream {
    async fn call(&self, _peer: &Peer, _procedure: &str, body: Bytes) -> Result<Bytes> {
        Ok(body)
    }
}
