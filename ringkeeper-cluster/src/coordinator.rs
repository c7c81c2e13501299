//! The ring change commit protocol.
//!
//! Every mutation goes through [`ChangeCoordinator`]:
//!
//! 1. write the versioned builder and ring files
//! 2. read them back and verify they decode to the same version
//! 3. replicate to the replica quorum, with the previous version as rollback
//! 4. rewrite the canonical files
//! 5. swap the in-memory snapshot
//! 6. post to the fleet and publish to ring-stream subscribers
//!
//! A failure before step 5 leaves the committed snapshot in memory and the
//! canonical files untouched. Mutations are serialized by one write gate held
//! for the whole sequence, including replica round-trips.

use crate::error::{ClusterError, ClusterResult};
use crate::fleet::{FleetUpdate, Mailbox};
use crate::replica::ReplicaManager;
use crate::snapshot::{RingSnapshot, SnapshotStore};
use crate::storage::{FileKind, RingStorage, Slot};
use bytes::Bytes;
use ringkeeper_core::{Builder, NodeSet, Ring, RingVersion};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// Capacity of the ring-stream broadcast channel.
const EVENT_CAPACITY: usize = 64;

/// A new builder and the ring derived from it.
#[derive(Debug, Clone)]
pub struct RingChange {
    /// Builder to become current.
    pub builder: Builder,
    /// Ring produced by `builder`.
    pub ring: Ring,
}

impl RingChange {
    /// Version the change commits.
    pub fn version(&self) -> RingVersion {
        self.ring.version()
    }
}

/// Outcome of a mutation closure.
#[derive(Debug)]
pub enum Staged<T> {
    /// Commit the edited builder as a new version.
    Commit(T),
    /// Drop the edit; the version stays where it is.
    Unchanged(T),
}

/// Serializes and commits ring changes.
pub struct ChangeCoordinator {
    store: SnapshotStore,
    storage: Arc<dyn RingStorage>,
    replicas: Arc<ReplicaManager>,
    mailbox: Arc<Mailbox>,
    events: broadcast::Sender<RingVersion>,
    write_gate: Mutex<()>,
}

impl ChangeCoordinator {
    /// Create a coordinator starting from `snapshot`.
    pub fn new(
        snapshot: RingSnapshot,
        storage: Arc<dyn RingStorage>,
        replicas: Arc<ReplicaManager>,
        mailbox: Arc<Mailbox>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store: SnapshotStore::new(snapshot),
            storage,
            replicas,
            mailbox,
            events,
            write_gate: Mutex::new(()),
        }
    }

    /// The committed snapshot. Never waits for a change in flight.
    pub fn current(&self) -> Arc<RingSnapshot> {
        self.store.current()
    }

    /// Receive the version of every later commit.
    pub fn subscribe(&self) -> broadcast::Receiver<RingVersion> {
        self.events.subscribe()
    }

    /// Commit a prepared change.
    pub async fn apply_change(&self, change: RingChange) -> ClusterResult<Arc<RingSnapshot>> {
        let _gate = self.write_gate.lock().await;
        self.commit(change).await
    }

    /// Edit a private copy of the current builder and commit it.
    ///
    /// `edit` runs under the write gate, so it sees the latest committed
    /// state. Returning [`Staged::Unchanged`] discards the copy. Returns the
    /// closure's value with the snapshot current afterwards.
    pub async fn mutate<T, F>(&self, edit: F) -> ClusterResult<(T, Arc<RingSnapshot>)>
    where
        F: FnOnce(&RingSnapshot, &mut Builder) -> ClusterResult<Staged<T>> + Send,
        T: Send,
    {
        let _gate = self.write_gate.lock().await;
        let current = self.store.current();
        let mut builder = Builder::clone(current.builder());

        match edit(&*current, &mut builder)? {
            Staged::Unchanged(value) => Ok((value, current)),
            Staged::Commit(value) => {
                let ring = builder.ring();
                let snapshot = self.commit(RingChange { builder, ring }).await?;
                Ok((value, snapshot))
            }
        }
    }

    async fn commit(&self, change: RingChange) -> ClusterResult<Arc<RingSnapshot>> {
        let current = self.store.current();
        let version = change.version();
        if version <= current.version() {
            return Err(ClusterError::StaleChange {
                proposed: version,
                current: current.version(),
            });
        }

        let builder_bytes = Bytes::from(change.builder.encode()?);
        let ring_bytes = Bytes::from(change.ring.encode()?);

        let slot = Slot::Versioned(version);
        self.storage.persist(slot, FileKind::Builder, &builder_bytes)?;
        self.storage.persist(slot, FileKind::Ring, &ring_bytes)?;

        let stored = self.storage.load(slot)?;
        if stored.ring != ring_bytes || stored.builder != builder_bytes {
            return Err(ClusterError::storage(
                format!("version {version}"),
                "ring files read back differ from what was written",
            ));
        }
        let snapshot = RingSnapshot::from_bytes(stored.ring, stored.builder)?;
        if snapshot.version() != version {
            return Err(ClusterError::VersionMismatch {
                expected: version,
                actual: snapshot.version(),
            });
        }
        tracing::debug!(version, "versioned ring files written");

        self.replicas
            .replicate(version, &ring_bytes, &builder_bytes, current.version())
            .await?;

        self.storage.persist(Slot::Canonical, FileKind::Builder, &builder_bytes)?;
        self.storage.persist(Slot::Canonical, FileKind::Ring, &ring_bytes)?;

        let snapshot = Arc::new(snapshot);
        self.store.swap(Arc::clone(&snapshot));
        tracing::info!(
            version,
            previous = current.version(),
            nodes = snapshot.ring().nodes().len(),
            "ring change committed"
        );

        self.mailbox.post(FleetUpdate::from_snapshot(&snapshot));
        // No subscribers is fine.
        let _ = self.events.send(version);

        Ok(snapshot)
    }
}
