//! Shared error type across relaystats crates.

use thiserror::Error;

/// Stable failure reasons recorded against a call (metric label values).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Malformed call frame.
    BadRequest,
    /// No peer is registered for the callee.
    NoPeers,
    /// The upstream did not answer in time.
    Timeout,
    /// The upstream answered with an error.
    Upstream,
    /// Configuration was rejected.
    InvalidConfig,
    /// Unsupported config version.
    UnsupportedVersion,
}

impl FailureReason {
    /// String representation used for `CallStats::failed` and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::BadRequest => "bad-request",
            FailureReason::NoPeers => "no-peers",
            FailureReason::Timeout => "timeout",
            FailureReason::Upstream => "upstream",
            FailureReason::InvalidConfig => "invalid-config",
            FailureReason::UnsupportedVersion => "unsupported-version",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, RelayStatsError>;

/// Unified error type used by core and relay.
#[derive(Debug, Error)]
pub enum RelayStatsError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("no peers for service: {0}")]
    NoPeers(String),
    #[error("call timed out after {0} ms")]
    Timeout(u64),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("unsupported config version")]
    UnsupportedVersion,
}

impl RelayStatsError {
    /// Map an error to the reason recorded on the call.
    pub fn reason(&self) -> FailureReason {
        match self {
            RelayStatsError::BadRequest(_) => FailureReason::BadRequest,
            RelayStatsError::NoPeers(_) => FailureReason::NoPeers,
            RelayStatsError::Timeout(_) => FailureReason::Timeout,
            RelayStatsError::Upstream(_) => FailureReason::Upstream,
            RelayStatsError::InvalidConfig(_) => FailureReason::InvalidConfig,
            RelayStatsError::UnsupportedVersion => FailureReason::UnsupportedVersion,
        }
    }
}
