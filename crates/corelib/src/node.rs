//! Storage node identity.
//!
//! Nodes are identified by a compact `NodeId` that is cheap to compare and hash,
//! and reached through the `addr` they publish when they join the cluster.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Compact identifier for a storage node.
///
/// Newtype over `u128` so comparisons and hashing are very fast. Fresh ids are
/// drawn from a v4 UUID, which fills exactly the same width.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct NodeId(pub u128);

impl NodeId {
    /// Generate a random node id.
    pub fn random() -> Self {
        Self(Uuid::new_v4().as_u128())
    }

    /// Derive a stable id from a node name.
    ///
    /// Used for statically configured nodes, so a restart of the name service
    /// assigns the same id to the same configured entry.
    pub fn from_name(name: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).as_u128())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// A storage node that can host block replicas.
///
/// Keep this struct small and cheap to clone: it is embedded in every replica
/// assignment that travels on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Human‑readable name or hostname.
    pub name: String,
    /// `host:port` the node's block service listens on.
    pub addr: String,
    /// Optional rack label for rack‑aware placement.
    pub rack: Option<String>,
}

impl Node {
    /// Construct a new node with basic metadata.
    pub fn new(id: NodeId, name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            addr: addr.into(),
            rack: None,
        }
    }

    pub fn with_rack(mut self, rack: impl Into<Option<String>>) -> Self {
        self.rack = rack.into();
        self
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.addr)
    }
}
