//! Master-side replica management: handshake, per-change store and quorum.

use crate::error::{ClusterError, ClusterResult};
use crate::proto::ring_replica_client::RingReplicaClient;
use crate::proto::{ReplicaPayload, StoreResult};
use crate::snapshot::RingSnapshot;
use crate::transport::{self, Transport, DIAL_TIMEOUT};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use ringkeeper_core::RingVersion;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::Channel;

/// Time allowed for the registration handshake.
pub const SETUP_TIMEOUT: Duration = Duration::from_secs(4);

/// Time a replica has to store a change. Also sent as the change deadline.
pub const STORE_TIMEOUT: Duration = Duration::from_secs(60);

/// What the master knows about one replica.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaState {
    /// Last version the replica confirmed storing.
    pub version: RingVersion,
    /// When the replica last confirmed anything.
    pub last_seen: Option<DateTime<Utc>>,
    /// Whether the last exchange succeeded.
    pub alive: bool,
}

/// Status of a configured replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaStatus {
    /// Replica address.
    pub addr: String,
    /// Whether the handshake has completed.
    pub registered: bool,
    /// Replica state; default until registered.
    pub state: ReplicaState,
}

/// A registered replica.
#[derive(Debug)]
struct Replica {
    addr: String,
    client: RingReplicaClient<Channel>,
    state: RwLock<ReplicaState>,
}

impl Replica {
    async fn store(&self, payload: ReplicaPayload) -> ClusterResult<()> {
        let version = payload.version;
        let mut client = self.client.clone();

        let outcome = transport::call("replica store", STORE_TIMEOUT, client.store(payload))
            .await
            .and_then(|result| check_result(&self.addr, version, result));

        let mut state = self.state.write();
        match outcome {
            Ok(()) => {
                state.version = version;
                state.last_seen = Some(Utc::now());
                state.alive = true;
                Ok(())
            }
            Err(e) => {
                state.alive = false;
                Err(e)
            }
        }
    }
}

fn check_result(addr: &str, version: RingVersion, result: StoreResult) -> ClusterResult<()> {
    if !result.err_msg.is_empty() {
        return Err(ClusterError::Rpc(tonic::Status::aborted(format!(
            "replica {addr}: {}",
            result.err_msg
        ))));
    }
    if result.version != version {
        return Err(ClusterError::VersionMismatch {
            expected: version,
            actual: result.version,
        });
    }
    if !result.ring_stored || !result.builder_stored {
        return Err(ClusterError::Rpc(tonic::Status::data_loss(format!(
            "replica {addr} did not store ring {}, builder {}",
            result.ring_stored, result.builder_stored
        ))));
    }
    Ok(())
}

/// Tracks configured replicas and replicates changes to them.
#[derive(Debug)]
pub struct ReplicaManager {
    transport: Transport,
    configured: Vec<String>,
    registered: RwLock<BTreeMap<String, Arc<Replica>>>,
}

impl ReplicaManager {
    /// Create a manager for the given replica addresses. Nothing is dialed yet.
    pub fn new(transport: Transport, addrs: Vec<String>) -> Self {
        Self {
            transport,
            configured: addrs,
            registered: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of configured replicas.
    pub fn configured(&self) -> usize {
        self.configured.len()
    }

    /// Dial a replica and hand it the full current state.
    ///
    /// The replica must echo the version and confirm both files were stored.
    pub async fn register(&self, addr: &str, snapshot: &RingSnapshot) -> ClusterResult<()> {
        let channel = self.transport.connect(addr, DIAL_TIMEOUT).await?;
        let mut client = RingReplicaClient::new(channel);

        let version = snapshot.version();
        let payload = ReplicaPayload {
            version,
            ring: snapshot.ring_bytes().to_vec(),
            builder: snapshot.builder_bytes().to_vec(),
            deadline: 0,
            rollback: 0,
        };
        let result = transport::call("replica setup", SETUP_TIMEOUT, client.setup(payload)).await?;
        check_result(addr, version, result)?;

        let replica = Arc::new(Replica {
            addr: addr.to_string(),
            client,
            state: RwLock::new(ReplicaState {
                version,
                last_seen: Some(Utc::now()),
                alive: true,
            }),
        });
        self.registered.write().insert(addr.to_string(), replica);
        tracing::info!(replica = %addr, version, "replica registered");
        Ok(())
    }

    /// Register every configured replica that is not registered yet.
    ///
    /// Failures are logged and leave the replica pending. Returns how many
    /// replicas are registered afterwards.
    pub async fn reconnect_pending(&self, snapshot: &RingSnapshot) -> usize {
        let pending: Vec<&String> = {
            let registered = self.registered.read();
            self.configured
                .iter()
                .filter(|addr| !registered.contains_key(addr.as_str()))
                .collect()
        };

        let attempts = pending.iter().map(|addr| async move {
            if let Err(e) = self.register(addr.as_str(), snapshot).await {
                tracing::warn!(replica = %addr, error = %e, "replica registration failed");
            }
        });
        join_all(attempts).await;

        self.registered.read().len()
    }

    /// Store a change on every replica.
    ///
    /// All registered replicas are attempted concurrently and the quorum is
    /// counted over them alone. More than half failing is a quorum error.
    /// Configured replicas that never registered are not part of the round.
    pub async fn replicate(
        &self,
        version: RingVersion,
        ring_bytes: &Bytes,
        builder_bytes: &Bytes,
        rollback: RingVersion,
    ) -> ClusterResult<()> {
        let replicas: Vec<Arc<Replica>> = self.registered.read().values().cloned().collect();
        let total = replicas.len();
        if total == 0 {
            if !self.configured.is_empty() {
                tracing::warn!(version, "no registered replicas, change not replicated");
            }
            return Ok(());
        }

        let deadline = Utc::now().timestamp() + STORE_TIMEOUT.as_secs() as i64;
        let payload = ReplicaPayload {
            version,
            ring: ring_bytes.to_vec(),
            builder: builder_bytes.to_vec(),
            deadline,
            rollback,
        };

        let results = join_all(replicas.iter().map(|r| r.store(payload.clone()))).await;

        let mut failed = 0;
        for (replica, result) in replicas.iter().zip(results) {
            match result {
                Ok(()) => tracing::debug!(replica = %replica.addr, version, "replica stored change"),
                Err(e) => {
                    failed += 1;
                    tracing::warn!(replica = %replica.addr, version, error = %e, "replica store failed");
                }
            }
        }

        if failed > total / 2 {
            tracing::error!(version, failed, total, "replica quorum not reached");
            return Err(ClusterError::Quorum { failed, total });
        }
        tracing::info!(version, failed, total, "change replicated");
        Ok(())
    }

    /// Status of every configured replica.
    pub fn statuses(&self) -> Vec<ReplicaStatus> {
        let registered = self.registered.read();
        self.configured
            .iter()
            .map(|addr| match registered.get(addr) {
                Some(replica) => ReplicaStatus {
                    addr: addr.clone(),
                    registered: true,
                    state: replica.state.read().clone(),
                },
                None => ReplicaStatus {
                    addr: addr.clone(),
                    registered: false,
                    state: ReplicaState::default(),
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(version: u64, ring: bool, builder: bool, err: &str) -> StoreResult {
        StoreResult {
            version,
            ring_stored: ring,
            builder_stored: builder,
            err_msg: err.to_string(),
        }
    }

    #[test]
    fn test_check_result() {
        check_result("r1", 4, result(4, true, true, "")).unwrap();
        assert!(matches!(
            check_result("r1", 4, result(3, true, true, "")),
            Err(ClusterError::VersionMismatch {
                expected: 4,
                actual: 3
            })
        ));
        assert!(check_result("r1", 4, result(4, true, false, "")).is_err());
        assert!(check_result("r1", 4, result(4, true, true, "disk full")).is_err());
    }

    #[tokio::test]
    async fn test_no_replicas_is_trivial_quorum() {
        let manager = ReplicaManager::new(Transport::plaintext(), Vec::new());
        manager
            .replicate(2, &Bytes::new(), &Bytes::new(), 1)
            .await
            .unwrap();
        assert!(manager.statuses().is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_replicas_are_outside_quorum() {
        let manager = ReplicaManager::new(
            Transport::plaintext(),
            vec!["127.0.0.1:1".to_string(), "127.0.0.1:2".to_string()],
        );
        manager
            .replicate(2, &Bytes::new(), &Bytes::new(), 1)
            .await
            .unwrap();
        assert_eq!(manager.configured(), 2);
        assert!(manager.statuses().iter().all(|s| !s.registered));
    }
}
