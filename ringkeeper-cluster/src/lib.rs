//! Ring change coordination, replication and fleet distribution for ringkeeper.
//!
//! A master holds the authoritative ring. Every change is written to
//! versioned files, replicated to a majority of standby replicas, committed
//! to the canonical files and then pushed to every fleet member.
//!
//! # Architecture
//!
//! ```text
//!   operators / registering nodes
//!               │ RingControl
//!   ┌───────────▼──────────────────────────────────┐
//!   │ master                                        │
//!   │  RingManager ──► ChangeCoordinator            │
//!   │                   │ persist + verify          │
//!   │                   │ replicate ───────────────┼──► replicas (RingReplica)
//!   │                   │ commit canonical files    │
//!   │                   │ swap snapshot             │
//!   │                   ▼                           │
//!   │          Mailbox ──► FleetDistributor ────────┼──► fleet members (RemoteControl)
//!   └───────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use ringkeeper_cluster::{ClusterConfig, ServiceNode};
//!
//! let config = ClusterConfig::builder()
//!     .service("objects")
//!     .listen_addr("0.0.0.0:8443")
//!     .replicas(vec!["10.0.0.11:8443".to_string(), "10.0.0.12:8443".to_string()])
//!     .ring_dir("/etc/ringkeeper/ring")
//!     .build()?;
//!
//! let mut node = ServiceNode::start(config).await?;
//! let manager = node.manager().unwrap();
//! println!("serving ring version {}", manager.version());
//! node.shutdown().await;
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod fleet;
pub mod manager;
pub mod node;
pub mod registration;
pub mod replica;
pub mod service;
pub mod snapshot;
pub mod storage;
pub mod transport;

pub use config::{ClusterConfig, ClusterConfigBuilder, DaemonConfig, Role};
pub use coordinator::{ChangeCoordinator, RingChange, Staged};
pub use error::{ClusterError, ClusterResult};
pub use fleet::{CommandHandler, ControlReply, FleetDistributor, FleetMember, RemoteControlService};
pub use manager::RingManager;
pub use node::ServiceNode;
pub use registration::{Registration, RegistrationPolicy, WeightAssignment};
pub use replica::{ReplicaManager, ReplicaServer};
pub use service::RingControlService;
pub use snapshot::{RingSnapshot, SnapshotStore};
pub use storage::{FileKind, FileRingStorage, RingStorage, Slot, StoredPair};
pub use transport::Transport;

// Generated protobuf code
pub mod proto {
    tonic::include_proto!("ringkeeper.v1");
}
