//! Error types for ring model operations.

use crate::node::NodeId;
use thiserror::Error;

/// Result type for ring model operations.
pub type RingResult<T> = std::result::Result<T, RingError>;

/// Errors produced while mutating, encoding or querying a ring.
#[derive(Debug, Error)]
pub enum RingError {
    /// A node must carry at least one tier and a non-empty tier 0.
    #[error("Node tiers are invalid: {0}")]
    InvalidTiers(String),

    /// Another node already owns this tier 0 value.
    #[error("Tier 0 value '{0}' already exists in the ring")]
    DuplicateTier(String),

    /// No node with this ID exists.
    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    /// A node filter expression could not be parsed.
    #[error("Invalid node filter '{expr}': {cause}")]
    InvalidFilter {
        /// The rejected expression.
        expr: String,
        /// Why it was rejected.
        cause: String,
    },

    /// Encoding or decoding a ring or builder failed.
    #[error("Codec error: {0}")]
    Codec(String),
}

impl From<serde_json::Error> for RingError {
    fn from(e: serde_json::Error) -> Self {
        RingError::Codec(e.to_string())
    }
}
