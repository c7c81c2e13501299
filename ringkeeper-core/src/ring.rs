//! Immutable, versioned ring snapshots.

use crate::error::RingResult;
use crate::filter::NodeSet;
use crate::node::Node;
use serde::{Deserialize, Serialize};

/// Version number of a ring. Strictly increases with every committed change.
pub type RingVersion = u64;

/// An immutable snapshot of cluster membership.
///
/// A `Ring` is produced by [`Builder::ring`](crate::Builder::ring) and never
/// changes afterwards. Newer state always arrives as a new `Ring`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ring {
    pub(crate) version: RingVersion,
    pub(crate) replica_count: u32,
    pub(crate) nodes: Vec<Node>,
    #[serde(default)]
    pub(crate) conf: Vec<u8>,
}

impl Ring {
    /// The ring version.
    pub fn version(&self) -> RingVersion {
        self.version
    }

    /// How many replicas of each partition the placement layer keeps.
    pub fn replica_count(&self) -> u32 {
        self.replica_count
    }

    /// Global configuration bytes.
    pub fn conf(&self) -> &[u8] {
        &self.conf
    }

    /// Serialize the ring.
    pub fn encode(&self) -> RingResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize a ring produced by [`Ring::encode`].
    pub fn decode(bytes: &[u8]) -> RingResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl NodeSet for Ring {
    fn nodes(&self) -> &[Node] {
        &self.nodes
    }
}
