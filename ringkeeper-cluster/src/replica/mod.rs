//! Standby replicas.
//!
//! The master side ([`ReplicaManager`]) performs the registration handshake
//! and gates every commit on a majority of replicas storing the change. The
//! replica side ([`ReplicaServer`]) serves the `RingReplica` service over a
//! [`RingStorage`](crate::storage::RingStorage).

mod manager;
mod server;

pub use manager::{ReplicaManager, ReplicaState, ReplicaStatus, SETUP_TIMEOUT, STORE_TIMEOUT};
pub use server::ReplicaServer;
