//! Node placement records.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable numeric identifier of a node, assigned when the node is created.
pub type NodeId = u64;

/// A cluster member's placement metadata.
///
/// Nodes are only created through [`Builder::add_node`](crate::Builder::add_node)
/// and are read-only once they are part of a [`Ring`](crate::Ring).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) active: bool,
    pub(crate) capacity: u32,
    pub(crate) tiers: Vec<String>,
    pub(crate) addresses: Vec<String>,
    pub(crate) meta: String,
    #[serde(default)]
    pub(crate) conf: Vec<u8>,
}

impl Node {
    /// The node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Whether the node takes part in placement.
    pub fn active(&self) -> bool {
        self.active
    }

    /// Relative weight of the node.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Placement topology labels, most specific first.
    pub fn tiers(&self) -> &[String] {
        &self.tiers
    }

    /// Tier at `level`, if the node has that many tiers.
    pub fn tier(&self, level: usize) -> Option<&str> {
        self.tiers.get(level).map(String::as_str)
    }

    /// Network addresses (`host:port`).
    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// Address at `index`, if present.
    pub fn address(&self, index: usize) -> Option<&str> {
        self.addresses.get(index).map(String::as_str)
    }

    /// Free-form metadata.
    pub fn meta(&self) -> &str {
        &self.meta
    }

    /// Opaque per-node configuration.
    pub fn conf(&self) -> &[u8] {
        &self.conf
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:016x} active={} capacity={} tiers=[{}] addresses=[{}] meta={}",
            self.id,
            self.active,
            self.capacity,
            self.tiers.join(","),
            self.addresses.join(","),
            self.meta
        )
    }
}

/// Everything needed to add a node to a builder. The ID is assigned by the builder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Whether the node takes part in placement.
    pub active: bool,
    /// Relative weight.
    pub capacity: u32,
    /// Topology labels; tier 0 must be unique across the ring.
    pub tiers: Vec<String>,
    /// Network addresses (`host:port`).
    pub addresses: Vec<String>,
    /// Free-form metadata.
    pub meta: String,
    /// Opaque per-node configuration.
    pub conf: Vec<u8>,
}
