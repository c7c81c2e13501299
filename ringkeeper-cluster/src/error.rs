//! Error types for ring control operations.

use ringkeeper_core::{NodeId, RingError, RingVersion};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for cluster operations.
pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// Errors that can occur in cluster operations.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// A ring or builder file could not be written or read back.
    #[error("Storage error at {}: {cause}", path.display())]
    Storage {
        /// File involved.
        path: PathBuf,
        /// What went wrong.
        cause: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport error while dialing a peer.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// A remote call returned an error status.
    #[error("RPC error: {0}")]
    Rpc(#[from] tonic::Status),

    /// No connection is open to the peer.
    #[error("Not connected to {0}")]
    NotConnected(String),

    /// A remote call did not complete in time.
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        /// Operation name.
        operation: &'static str,
        /// The deadline that was exceeded.
        elapsed: Duration,
    },

    /// Too many replicas failed to store a change.
    #[error("Replica quorum not reached: {failed} of {total} replicas failed")]
    Quorum {
        /// Replicas that failed.
        failed: usize,
        /// Replicas attempted.
        total: usize,
    },

    /// A peer reported a different version than expected.
    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Version that was sent.
        expected: RingVersion,
        /// Version the peer reported.
        actual: RingVersion,
    },

    /// A change does not advance the ring version.
    #[error("Stale change: version {proposed} is not newer than {current}")]
    StaleChange {
        /// Version of the rejected change.
        proposed: RingVersion,
        /// Currently committed version.
        current: RingVersion,
    },

    /// A request was rejected by validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Ring model error.
    #[error("Ring error: {0}")]
    Ring(#[from] RingError),

    /// Node not found in the ring.
    #[error("Node {0:016x} not found in ring")]
    NodeNotFound(NodeId),

    /// Fleet member not tracked.
    #[error("Fleet member {0:016x} not found")]
    MemberNotFound(NodeId),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClusterError {
    /// Build a storage error for `path`.
    pub fn storage(path: impl Into<PathBuf>, cause: impl ToString) -> Self {
        ClusterError::Storage {
            path: path.into(),
            cause: cause.to_string(),
        }
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(e: serde_json::Error) -> Self {
        ClusterError::Ring(RingError::from(e))
    }
}

impl From<ClusterError> for tonic::Status {
    fn from(e: ClusterError) -> Self {
        use tonic::Status;
        match e {
            ClusterError::Rpc(status) => status,
            ClusterError::Validation(_) | ClusterError::Ring(_) => {
                Status::invalid_argument(e.to_string())
            }
            ClusterError::NodeNotFound(_) | ClusterError::MemberNotFound(_) => {
                Status::not_found(e.to_string())
            }
            ClusterError::StaleChange { .. } | ClusterError::VersionMismatch { .. } => {
                Status::failed_precondition(e.to_string())
            }
            ClusterError::Timeout { .. } => Status::deadline_exceeded(e.to_string()),
            ClusterError::Transport(_)
            | ClusterError::NotConnected(_)
            | ClusterError::Quorum { .. } => {
                Status::unavailable(e.to_string())
            }
            ClusterError::Storage { .. } | ClusterError::Io(_) | ClusterError::Config(_) => {
                Status::internal(e.to_string())
            }
        }
    }
}
