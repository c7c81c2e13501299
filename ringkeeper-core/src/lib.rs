//! Ring membership model for ringkeeper.
//!
//! This crate provides the placement data structures the control plane
//! operates on:
//!
//! - **Node**: a member's placement record (ID, tiers, addresses, weight, meta, conf)
//! - **Builder**: the mutable staging structure that produces new rings
//! - **Ring**: an immutable, versioned snapshot of membership
//! - **NodeFilter**: predicates for querying nodes by ID, meta, tier or address
//!
//! Partition assignment is deliberately absent; consumers only need to mutate
//! membership, produce versioned snapshots, serialize them and query nodes.
//!
//! # Example
//!
//! ```
//! use ringkeeper_core::{Builder, NodeFilter, NodeSet, NodeSpec};
//!
//! let mut builder = Builder::new(3);
//! builder
//!     .add_node(NodeSpec {
//!         active: true,
//!         capacity: 100,
//!         tiers: vec!["server1".into(), "zone1".into()],
//!         addresses: vec!["10.0.0.1:8001".into()],
//!         meta: "server1|hw-1".into(),
//!         conf: Vec::new(),
//!     })
//!     .unwrap();
//!
//! let ring = builder.ring();
//! assert_eq!(ring.version(), 1);
//! assert_eq!(ring.filter(&[NodeFilter::tier_eq(1, "zone1")]).len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod error;
pub mod filter;
pub mod node;
pub mod ring;

pub use builder::Builder;
pub use error::{RingError, RingResult};
pub use filter::{NodeFilter, NodeSet, TextMatch};
pub use node::{Node, NodeId, NodeSpec};
pub use ring::{Ring, RingVersion};
