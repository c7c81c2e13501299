//! The in-memory ring snapshot.

use crate::error::{ClusterError, ClusterResult};
use crate::storage::{RingStorage, Slot};
use bytes::Bytes;
use parking_lot::RwLock;
use ringkeeper_core::{Builder, Ring, RingVersion};
use std::sync::Arc;

/// A committed ring and builder together with their serialized forms.
#[derive(Debug, Clone)]
pub struct RingSnapshot {
    ring: Arc<Ring>,
    builder: Arc<Builder>,
    ring_bytes: Bytes,
    builder_bytes: Bytes,
}

impl RingSnapshot {
    /// Decode a snapshot from its serialized forms.
    ///
    /// Fails unless the ring and builder agree on the version.
    pub fn from_bytes(
        ring_bytes: impl Into<Bytes>,
        builder_bytes: impl Into<Bytes>,
    ) -> ClusterResult<Self> {
        let ring_bytes = ring_bytes.into();
        let builder_bytes = builder_bytes.into();
        let ring = Ring::decode(&ring_bytes)?;
        let builder = Builder::decode(&builder_bytes)?;

        if ring.version() != builder.version() {
            return Err(ClusterError::VersionMismatch {
                expected: ring.version(),
                actual: builder.version(),
            });
        }

        Ok(Self {
            ring: Arc::new(ring),
            builder: Arc::new(builder),
            ring_bytes,
            builder_bytes,
        })
    }

    /// Load the snapshot to start from.
    ///
    /// Uses the canonical pair, falling back to the newest versioned pair
    /// when the canonical pair does not decode. `None` when storage is empty.
    pub fn recover(storage: &dyn RingStorage) -> ClusterResult<Option<Self>> {
        let Some((slot, pair)) = storage.load_latest()? else {
            return Ok(None);
        };

        match Self::from_bytes(pair.ring, pair.builder) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) if slot == Slot::Canonical => {
                let Some(&version) = storage.versions()?.last() else {
                    return Err(e);
                };
                tracing::warn!(
                    error = %e,
                    version,
                    "canonical ring files unreadable, starting from newest versioned pair"
                );
                let pair = storage.load(Slot::Versioned(version))?;
                Self::from_bytes(pair.ring, pair.builder).map(Some)
            }
            Err(e) => Err(e),
        }
    }

    /// Ring version.
    pub fn version(&self) -> RingVersion {
        self.ring.version()
    }

    /// The ring.
    pub fn ring(&self) -> &Arc<Ring> {
        &self.ring
    }

    /// The builder the ring was produced from.
    pub fn builder(&self) -> &Arc<Builder> {
        &self.builder
    }

    /// Serialized ring.
    pub fn ring_bytes(&self) -> &Bytes {
        &self.ring_bytes
    }

    /// Serialized builder.
    pub fn builder_bytes(&self) -> &Bytes {
        &self.builder_bytes
    }
}

/// Holder of the current snapshot.
///
/// Readers clone the `Arc` under a short read lock; a commit replaces it
/// under the write lock.
#[derive(Debug)]
pub struct SnapshotStore {
    current: RwLock<Arc<RingSnapshot>>,
}

impl SnapshotStore {
    /// Create a store holding `snapshot`.
    pub fn new(snapshot: RingSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The current snapshot.
    pub fn current(&self) -> Arc<RingSnapshot> {
        self.current.read().clone()
    }

    /// Replace the current snapshot, returning the previous one.
    pub fn swap(&self, snapshot: Arc<RingSnapshot>) -> Arc<RingSnapshot> {
        std::mem::replace(&mut *self.current.write(), snapshot)
    }
}
