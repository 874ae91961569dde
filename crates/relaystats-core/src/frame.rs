//! Call identity: the frame describing one relayed call and the peer that
//! served it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of one relayed call: `caller -> callee :: procedure`.
///
/// Immutable once built; two frames with the same triple share an edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallFrame {
    caller: String,
    callee: String,
    procedure: String,
}

impl CallFrame {
    pub fn new(
        caller: impl Into<String>,
        callee: impl Into<String>,
        procedure: impl Into<String>,
    ) -> Self {
        Self {
            caller: caller.into(),
            callee: callee.into(),
            procedure: procedure.into(),
        }
    }

    pub fn caller(&self) -> &str {
        &self.caller
    }

    pub fn callee(&self) -> &str {
        &self.callee
    }

    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    pub fn edge_key(&self) -> EdgeKey {
        EdgeKey::new(&self.caller, &self.callee, &self.procedure)
    }
}

/// Remote endpoint that served a call. Compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    host_port: String,
}

impl Peer {
    pub fn new(host_port: impl Into<String>) -> Self {
        Self {
            host_port: host_port.into(),
        }
    }

    pub fn host_port(&self) -> &str {
        &self.host_port
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.host_port)
    }
}

/// Composite key of a call-graph edge, formatted `caller->callee::procedure`.
///
/// No normalization: field order and case are significant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EdgeKey(String);

impl EdgeKey {
    pub fn new(caller: &str, callee: &str, procedure: &str) -> Self {
        Self(format!("{caller}->{callee}::{procedure}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
