//! Control-plane facade tying the coordinator, replicas and fleet together.

use crate::config::ClusterConfig;
use crate::coordinator::{ChangeCoordinator, Staged};
use crate::error::{ClusterError, ClusterResult};
use crate::fleet::{ControlReply, FleetDistributor, FleetUpdate, Mailbox};
use crate::registration::{Registration, RegistrationPolicy};
use crate::replica::{ReplicaManager, ReplicaStatus};
use crate::snapshot::RingSnapshot;
use crate::storage::{FileRingStorage, RingStorage};
use crate::transport::Transport;
use bytes::Bytes;
use parking_lot::Mutex;
use ringkeeper_core::{Node, NodeFilter, NodeId, NodeSet, NodeSpec, RingVersion};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// A running master for one ring service.
///
/// Owns the [`ChangeCoordinator`], the [`ReplicaManager`] and the
/// [`FleetDistributor`], plus the fleet worker and reconnect tasks.
pub struct RingManager {
    config: ClusterConfig,
    policy: RegistrationPolicy,
    coordinator: ChangeCoordinator,
    replicas: Arc<ReplicaManager>,
    fleet: Arc<FleetDistributor>,
    mailbox: Arc<Mailbox>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RingManager {
    /// Start a master from the ring files in the configured directory.
    pub async fn start(config: ClusterConfig) -> ClusterResult<Arc<Self>> {
        config.validate()?;
        let storage = FileRingStorage::new(&config.ring_dir, config.service.as_str())?;
        Self::with_storage(config, Arc::new(storage)).await
    }

    /// Start a master over any [`RingStorage`].
    pub async fn with_storage(
        config: ClusterConfig,
        storage: Arc<dyn RingStorage>,
    ) -> ClusterResult<Arc<Self>> {
        let snapshot = RingSnapshot::recover(storage.as_ref())?.ok_or_else(|| {
            ClusterError::Config(format!(
                "no ring found for service '{}' in {}",
                config.service,
                config.ring_dir.display()
            ))
        })?;
        tracing::info!(
            service = %config.service,
            version = snapshot.version(),
            nodes = snapshot.ring().nodes().len(),
            "loaded ring"
        );

        let policy = RegistrationPolicy::from_config(&config)?;
        let transport = Transport::from_config(&config)?;

        let replicas = Arc::new(ReplicaManager::new(
            transport.clone(),
            config.replicas.clone(),
        ));
        let registered = replicas.reconnect_pending(&snapshot).await;
        tracing::info!(registered, configured = replicas.configured(), "replicas registered");

        let mailbox = Arc::new(Mailbox::new());
        let fleet = Arc::new(FleetDistributor::new(
            transport,
            config.control_port,
            Arc::clone(&mailbox),
        ));
        fleet.bootstrap(FleetUpdate::from_snapshot(&snapshot)).await;

        let coordinator = ChangeCoordinator::new(
            snapshot,
            storage,
            Arc::clone(&replicas),
            Arc::clone(&mailbox),
        );

        let manager = Arc::new(Self {
            config,
            policy,
            coordinator,
            replicas,
            fleet,
            mailbox,
            tasks: Mutex::new(Vec::new()),
        });
        manager.spawn_background();
        Ok(manager)
    }

    fn spawn_background(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        tasks.push(self.fleet.spawn_worker());

        if let Some(interval) = self.config.reconnect_interval() {
            let weak: Weak<Self> = Arc::downgrade(self);
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let Some(manager) = weak.upgrade() else {
                        break;
                    };
                    manager.reconnect().await;
                }
            }));
        }
    }

    /// Service configuration.
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Current ring version.
    pub fn version(&self) -> RingVersion {
        self.coordinator.current().version()
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<RingSnapshot> {
        self.coordinator.current()
    }

    /// The change coordinator.
    pub fn coordinator(&self) -> &ChangeCoordinator {
        &self.coordinator
    }

    /// The fleet distributor.
    pub fn fleet(&self) -> &Arc<FleetDistributor> {
        &self.fleet
    }

    /// Status of every configured replica.
    pub fn replica_statuses(&self) -> Vec<ReplicaStatus> {
        self.replicas.statuses()
    }

    /// Receive the version of every later commit.
    pub fn subscribe(&self) -> broadcast::Receiver<RingVersion> {
        self.coordinator.subscribe()
    }

    /// Add a node.
    pub async fn add_node(&self, spec: NodeSpec) -> ClusterResult<(NodeId, RingVersion)> {
        let (id, snapshot) = self
            .coordinator
            .mutate(|_, builder| Ok(Staged::Commit(builder.add_node(spec)?.id())))
            .await?;
        tracing::info!(node = %format!("{id:016x}"), version = snapshot.version(), "node added");
        Ok((id, snapshot.version()))
    }

    /// Remove a node.
    pub async fn remove_node(&self, id: NodeId) -> ClusterResult<RingVersion> {
        let (node, snapshot) = self
            .coordinator
            .mutate(|_, builder| {
                let node = builder
                    .remove_node(id)
                    .ok_or(ClusterError::NodeNotFound(id))?;
                Ok(Staged::Commit(node))
            })
            .await?;
        tracing::info!(node = %node, version = snapshot.version(), "node removed");
        Ok(snapshot.version())
    }

    /// Replace the global configuration bytes.
    pub async fn set_config(&self, conf: Vec<u8>) -> ClusterResult<RingVersion> {
        let ((), snapshot) = self
            .coordinator
            .mutate(|_, builder| {
                builder.set_conf(conf);
                Ok(Staged::Commit(()))
            })
            .await?;
        tracing::info!(version = snapshot.version(), "global config updated");
        Ok(snapshot.version())
    }

    /// Global configuration bytes and the version they belong to.
    pub fn global_config(&self) -> (Vec<u8>, RingVersion) {
        let snapshot = self.coordinator.current();
        (snapshot.ring().conf().to_vec(), snapshot.version())
    }

    /// A node's own configuration bytes.
    pub fn node_config(&self, id: NodeId) -> ClusterResult<(Vec<u8>, RingVersion)> {
        let snapshot = self.coordinator.current();
        let node = snapshot
            .ring()
            .node(id)
            .ok_or(ClusterError::NodeNotFound(id))?;
        Ok((node.conf().to_vec(), snapshot.version()))
    }

    /// Nodes matching every filter.
    pub fn search(&self, filters: &[NodeFilter]) -> Vec<Node> {
        self.coordinator
            .current()
            .ring()
            .filter(filters)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Serialized current ring.
    pub fn ring(&self) -> (Bytes, RingVersion) {
        let snapshot = self.coordinator.current();
        (snapshot.ring_bytes().clone(), snapshot.version())
    }

    /// Register a node, or find it if it registered before.
    ///
    /// Returns the node's ID and the ring it should start with. A repeat
    /// registration does not change the ring.
    pub async fn register(&self, registration: Registration) -> ClusterResult<(NodeId, Bytes)> {
        let addresses = self.policy.admit_addresses(&registration.addrs)?;
        let policy = &self.policy;

        let ((id, existing), snapshot) = self
            .coordinator
            .mutate(|_, builder| {
                if let Some(node) =
                    policy.find_existing(&*builder, &registration.hostname, &addresses)?
                {
                    return Ok(Staged::Unchanged((node.id(), true)));
                }
                policy.validate_tiers(&*builder, &registration.tiers)?;
                let spec = policy.node_spec(&registration, addresses.clone());
                Ok(Staged::Commit((builder.add_node(spec)?.id(), false)))
            })
            .await?;

        tracing::info!(
            hostname = %registration.hostname,
            node = %format!("{id:016x}"),
            existing,
            weights = %policy.weights(),
            version = snapshot.version(),
            "node registered"
        );
        Ok((id, snapshot.ring_bytes().clone()))
    }

    /// Software version a fleet member runs.
    pub async fn node_software_version(&self, id: NodeId) -> ClusterResult<String> {
        self.require_node(id)?;
        self.fleet.member(id)?.software_version().await
    }

    /// Ask a fleet member to upgrade itself.
    pub async fn upgrade_node_software(
        &self,
        id: NodeId,
        version: &str,
    ) -> ClusterResult<ControlReply> {
        self.require_node(id)?;
        self.fleet.member(id)?.upgrade_software_version(version).await
    }

    fn require_node(&self, id: NodeId) -> ClusterResult<()> {
        match self.coordinator.current().ring().node(id) {
            Some(_) => Ok(()),
            None => Err(ClusterError::NodeNotFound(id)),
        }
    }

    /// Retry unregistered replicas and unreachable fleet members.
    pub async fn reconnect(&self) {
        let snapshot = self.coordinator.current();
        self.replicas.reconnect_pending(&snapshot).await;
        self.fleet.connect_pending().await;
    }

    /// Stop background tasks.
    pub fn shutdown(&self) {
        self.mailbox.close();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        tracing::info!(service = %self.config.service, "ring manager stopped");
    }
}
