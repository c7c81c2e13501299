//! Replica-side store service.

use crate::proto::ring_replica_server::RingReplica;
use crate::proto::{ReplicaPayload, StoreResult};
use crate::snapshot::RingSnapshot;
use crate::storage::{FileKind, RingStorage, Slot};
use chrono::Utc;
use parking_lot::Mutex;
use ringkeeper_core::RingVersion;
use std::sync::Arc;
use tonic::{Request, Response, Status};

#[derive(Debug, Default)]
struct Held {
    version: RingVersion,
    rollback: Option<RingVersion>,
}

/// gRPC service storing rings on behalf of a master.
pub struct ReplicaServer {
    storage: Arc<dyn RingStorage>,
    held: Mutex<Held>,
}

impl ReplicaServer {
    /// Create a replica over `storage`, resuming from whatever it holds.
    pub fn new(storage: Arc<dyn RingStorage>) -> Self {
        let version = match RingSnapshot::recover(storage.as_ref()) {
            Ok(Some(snapshot)) => snapshot.version(),
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!(error = %e, "replica storage unreadable, starting empty");
                0
            }
        };
        tracing::info!(version, "replica ready");
        Self {
            storage,
            held: Mutex::new(Held {
                version,
                rollback: None,
            }),
        }
    }

    /// Version currently held.
    pub fn version(&self) -> RingVersion {
        self.held.lock().version
    }

    /// Version the master said to revert to if the last change is abandoned.
    pub fn rollback_hint(&self) -> Option<RingVersion> {
        self.held.lock().rollback
    }

    fn write(&self, payload: &ReplicaPayload, held: &mut Held) -> StoreResult {
        let mut result = StoreResult {
            version: payload.version,
            ..Default::default()
        };

        let snapshot = match RingSnapshot::from_bytes(payload.ring.clone(), payload.builder.clone())
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                result.err_msg = format!("undecodable payload: {e}");
                return result;
            }
        };
        if snapshot.version() != payload.version {
            result.err_msg = format!(
                "payload claims version {} but ring is version {}",
                payload.version,
                snapshot.version()
            );
            return result;
        }

        let persist = |slot: Slot| -> (bool, bool) {
            let ring = self.storage.persist(slot, FileKind::Ring, &payload.ring);
            let builder = self.storage.persist(slot, FileKind::Builder, &payload.builder);
            if let Err(e) = &ring {
                tracing::error!(version = payload.version, error = %e, "replica ring persist failed");
            }
            if let Err(e) = &builder {
                tracing::error!(version = payload.version, error = %e, "replica builder persist failed");
            }
            (ring.is_ok(), builder.is_ok())
        };

        let (ring_versioned, builder_versioned) = persist(Slot::Versioned(payload.version));
        if !(ring_versioned && builder_versioned) {
            result.ring_stored = ring_versioned;
            result.builder_stored = builder_versioned;
            return result;
        }
        let (ring_stored, builder_stored) = persist(Slot::Canonical);
        result.ring_stored = ring_stored;
        result.builder_stored = builder_stored;

        if ring_stored && builder_stored {
            held.version = payload.version;
        }
        result
    }
}

#[tonic::async_trait]
impl RingReplica for ReplicaServer {
    async fn setup(
        &self,
        request: Request<ReplicaPayload>,
    ) -> Result<Response<StoreResult>, Status> {
        let payload = request.into_inner();
        let mut held = self.held.lock();

        let result = self.write(&payload, &mut held);
        held.rollback = None;
        if result.err_msg.is_empty() {
            tracing::info!(version = payload.version, "replica set up by master");
        }
        Ok(Response::new(result))
    }

    async fn store(
        &self,
        request: Request<ReplicaPayload>,
    ) -> Result<Response<StoreResult>, Status> {
        let payload = request.into_inner();
        let mut held = self.held.lock();

        if payload.deadline != 0 && Utc::now().timestamp() > payload.deadline {
            tracing::warn!(version = payload.version, "rejecting change past its deadline");
            return Ok(Response::new(StoreResult {
                version: payload.version,
                err_msg: "deadline exceeded".to_string(),
                ..Default::default()
            }));
        }
        if payload.version < held.version {
            tracing::warn!(
                version = payload.version,
                held = held.version,
                "rejecting older change"
            );
            return Ok(Response::new(StoreResult {
                version: payload.version,
                err_msg: format!(
                    "version {} is older than held version {}",
                    payload.version, held.version
                ),
                ..Default::default()
            }));
        }

        let result = self.write(&payload, &mut held);
        if result.err_msg.is_empty() && result.ring_stored && result.builder_stored {
            held.rollback = Some(payload.rollback);
            tracing::info!(
                version = payload.version,
                rollback = payload.rollback,
                "replica stored change"
            );
        }
        Ok(Response::new(result))
    }
}
