//! Mutable staging structure for the next ring.

use crate::error::{RingError, RingResult};
use crate::filter::{NodeFilter, NodeSet};
use crate::node::{Node, NodeId, NodeSpec};
use crate::ring::{Ring, RingVersion};
use serde::{Deserialize, Serialize};

/// Holds pending membership edits and produces new [`Ring`] versions.
///
/// Cloning a builder is the way to stage a change: edit the clone, derive a
/// ring from it, and either keep the clone or drop it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Builder {
    version: RingVersion,
    replica_count: u32,
    nodes: Vec<Node>,
    #[serde(default)]
    conf: Vec<u8>,
}

impl Builder {
    /// Create an empty builder. Its first ring will be version 1.
    pub fn new(replica_count: u32) -> Self {
        Self {
            version: 0,
            replica_count,
            nodes: Vec::new(),
            conf: Vec::new(),
        }
    }

    /// Version of the last ring this builder produced.
    pub fn version(&self) -> RingVersion {
        self.version
    }

    /// Replica count handed to produced rings.
    pub fn replica_count(&self) -> u32 {
        self.replica_count
    }

    /// Set the replica count.
    pub fn set_replica_count(&mut self, replica_count: u32) {
        self.replica_count = replica_count;
    }

    /// Global configuration bytes.
    pub fn conf(&self) -> &[u8] {
        &self.conf
    }

    /// Replace the global configuration bytes.
    pub fn set_conf(&mut self, conf: impl Into<Vec<u8>>) {
        self.conf = conf.into();
    }

    /// Add a node and return it with its freshly assigned ID.
    ///
    /// # Errors
    ///
    /// Fails if the spec has no tiers, an empty tier 0, or a tier 0 that
    /// another node already uses.
    pub fn add_node(&mut self, spec: NodeSpec) -> RingResult<&Node> {
        let tier0 = match spec.tiers.first() {
            Some(t) if !t.is_empty() => t.clone(),
            Some(_) => return Err(RingError::InvalidTiers("tier 0 is empty".into())),
            None => return Err(RingError::InvalidTiers("no tiers given".into())),
        };
        if !self.filter(&[NodeFilter::tier_eq(0, tier0.as_str())]).is_empty() {
            return Err(RingError::DuplicateTier(tier0));
        }

        let id = self.unused_id();
        self.nodes.push(Node {
            id,
            active: spec.active,
            capacity: spec.capacity,
            tiers: spec.tiers,
            addresses: spec.addresses,
            meta: spec.meta,
            conf: spec.conf,
        });
        Ok(&self.nodes[self.nodes.len() - 1])
    }

    /// Remove a node, returning it if it existed.
    pub fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        let pos = self.nodes.iter().position(|n| n.id == id)?;
        Some(self.nodes.remove(pos))
    }

    /// Derive the next ring. Every call produces a version one higher than the last.
    pub fn ring(&mut self) -> Ring {
        self.version += 1;
        Ring {
            version: self.version,
            replica_count: self.replica_count,
            nodes: self.nodes.clone(),
            conf: self.conf.clone(),
        }
    }

    /// Serialize the builder.
    pub fn encode(&self) -> RingResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize a builder produced by [`Builder::encode`].
    pub fn decode(bytes: &[u8]) -> RingResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn unused_id(&self) -> NodeId {
        loop {
            let id: NodeId = rand::random();
            if id != 0 && self.node(id).is_none() {
                return id;
            }
        }
    }
}

impl NodeSet for Builder {
    fn nodes(&self) -> &[Node] {
        &self.nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(tier0: &str, zone: &str, addr: &str) -> NodeSpec {
        NodeSpec {
            active: true,
            capacity: 1,
            tiers: vec![tier0.to_string(), zone.to_string()],
            addresses: vec![addr.to_string()],
            meta: format!("{tier0}|meta"),
            conf: b"Conf".to_vec(),
        }
    }

    #[test]
    fn test_ring_versions_increase() {
        let mut b = Builder::new(3);
        assert_eq!(b.ring().version(), 1);
        b.add_node(spec("server1", "zone1", "1.2.3.4:56789")).unwrap();
        let ring = b.ring();
        assert_eq!(ring.version(), 2);
        assert_eq!(ring.nodes().len(), 1);
        assert_eq!(ring.replica_count(), 3);
    }

    #[test]
    fn test_ring_is_detached_from_builder() {
        let mut b = Builder::new(1);
        let id = b.add_node(spec("server1", "zone1", "1.2.3.4:1")).unwrap().id();
        let ring = b.ring();
        b.remove_node(id);
        assert!(ring.node(id).is_some());
        assert!(b.node(id).is_none());
    }

    #[test]
    fn test_duplicate_tier0_rejected() {
        let mut b = Builder::new(1);
        b.add_node(spec("server1", "zone1", "1.2.3.4:1")).unwrap();
        let err = b.add_node(spec("server1", "zone9", "1.2.3.5:1")).unwrap_err();
        assert!(matches!(err, RingError::DuplicateTier(t) if t == "server1"));
        // Same tier at another level is fine.
        b.add_node(spec("zone1", "server1", "1.2.3.6:1")).unwrap();
    }

    #[test]
    fn test_empty_tiers_rejected() {
        let mut b = Builder::new(1);
        let mut s = spec("x", "y", "z:1");
        s.tiers.clear();
        assert!(matches!(b.add_node(s.clone()), Err(RingError::InvalidTiers(_))));
        s.tiers = vec![String::new()];
        assert!(matches!(b.add_node(s), Err(RingError::InvalidTiers(_))));
    }

    #[test]
    fn test_codec_preserves_state() {
        let mut b = Builder::new(2);
        b.set_conf(b"global".to_vec());
        b.add_node(spec("server1", "zone1", "1.2.3.4:1")).unwrap();
        let ring = b.ring();

        let decoded = Builder::decode(&b.encode().unwrap()).unwrap();
        assert_eq!(decoded, b);
        let decoded_ring = Ring::decode(&ring.encode().unwrap()).unwrap();
        assert_eq!(decoded_ring, ring);
        assert_eq!(decoded_ring.conf(), b"global");
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(
            Ring::decode(b"imnotaring"),
            Err(RingError::Codec(_))
        ));
    }
}
