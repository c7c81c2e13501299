//! Pushes committed rings to every fleet member.

use crate::error::{ClusterError, ClusterResult};
use crate::fleet::mailbox::{FleetUpdate, Mailbox};
use crate::fleet::member::{ControlReply, FleetMember};
use crate::transport::Transport;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use ringkeeper_core::{Node, NodeId, NodeSet, Ring};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Remote-control address for a node: the host of its first address with
/// the control port.
pub fn control_addr(node: &Node, control_port: u16) -> Option<String> {
    let addr = node.address(0)?;
    if let Ok(socket) = addr.parse::<SocketAddr>() {
        return Some(SocketAddr::new(socket.ip(), control_port).to_string());
    }
    let host = addr.rsplit_once(':').map_or(addr, |(host, _)| host);
    (!host.is_empty()).then(|| format!("{host}:{control_port}"))
}

/// Tracks one [`FleetMember`] per ring node and fans rings out to them.
///
/// Nodes that cannot be reached are kept as pending and retried by
/// [`connect_pending`](Self::connect_pending).
#[derive(Debug)]
pub struct FleetDistributor {
    transport: Transport,
    control_port: u16,
    members: RwLock<BTreeMap<NodeId, Arc<FleetMember>>>,
    pending: Mutex<BTreeMap<NodeId, String>>,
    latest: RwLock<Option<FleetUpdate>>,
    mailbox: Arc<Mailbox>,
}

impl FleetDistributor {
    /// Create a distributor fed by `mailbox`.
    pub fn new(transport: Transport, control_port: u16, mailbox: Arc<Mailbox>) -> Self {
        Self {
            transport,
            control_port,
            members: RwLock::new(BTreeMap::new()),
            pending: Mutex::new(BTreeMap::new()),
            latest: RwLock::new(None),
            mailbox,
        }
    }

    /// Queue a ring for distribution. Never blocks.
    pub fn notify(&self, update: FleetUpdate) {
        self.mailbox.post(update);
    }

    /// Connect to every node of the starting ring.
    ///
    /// Returns how many members connected.
    pub async fn bootstrap(&self, update: FleetUpdate) -> usize {
        self.track(&update.ring);
        *self.latest.write() = Some(update);
        self.connect_pending().await;
        let connected = self.members.read().len();
        tracing::info!(
            connected,
            pending = self.pending.lock().len(),
            "fleet bootstrapped"
        );
        connected
    }

    /// Bring membership in line with `update`'s ring and connect new nodes.
    pub async fn reconcile(&self, update: FleetUpdate) {
        self.track(&update.ring);
        *self.latest.write() = Some(update);
        self.connect_pending().await;
    }

    /// Drop members whose node left `ring`; mark new nodes pending.
    fn track(&self, ring: &Ring) {
        {
            let mut members = self.members.write();
            members.retain(|id, member| {
                let keep = ring.node(*id).is_some();
                if !keep {
                    tracing::info!(node = %format!("{id:016x}"), member = %member.addr(), "member left ring");
                }
                keep
            });
        }

        let members = self.members.read();
        let mut pending = self.pending.lock();
        pending.retain(|id, _| ring.node(*id).is_some());
        for node in ring.nodes() {
            if members.contains_key(&node.id()) || pending.contains_key(&node.id()) {
                continue;
            }
            match control_addr(node, self.control_port) {
                Some(addr) => {
                    pending.insert(node.id(), addr);
                }
                None => tracing::warn!(node = %node, "node has no address to control"),
            }
        }
    }

    fn still_in_ring(&self, id: NodeId) -> bool {
        self.latest
            .read()
            .as_ref()
            .is_some_and(|update| update.ring.node(id).is_some())
    }

    /// Try to connect every pending node. Newly connected members are sent
    /// the latest ring. Returns how many connected.
    pub async fn connect_pending(&self) -> usize {
        let attempts: Vec<(NodeId, String)> = std::mem::take(&mut *self.pending.lock())
            .into_iter()
            .collect();
        if attempts.is_empty() {
            return 0;
        }

        let results = join_all(attempts.into_iter().map(|(id, addr)| async move {
            let member = Arc::new(FleetMember::new(id, addr.clone(), self.transport.clone()));
            let result = member.connect().await;
            (id, addr, member, result)
        }))
        .await;

        let latest = self.latest.read().clone();
        let mut connected = 0;
        for (id, addr, member, result) in results {
            if !self.still_in_ring(id) {
                continue;
            }
            match result {
                Ok(()) => {
                    connected += 1;
                    tracing::info!(member = %addr, "fleet member connected");
                    self.members.write().insert(id, Arc::clone(&member));
                    if let Some(update) = latest.clone() {
                        tokio::spawn(push(member, update));
                    }
                }
                Err(e) => {
                    tracing::warn!(member = %addr, error = %e, "fleet member unreachable");
                    self.pending.lock().insert(id, addr);
                }
            }
        }
        connected
    }

    /// Disconnect and forget one member.
    pub async fn remove_member(&self, id: NodeId) -> ClusterResult<()> {
        let member = self
            .members
            .write()
            .remove(&id)
            .ok_or(ClusterError::MemberNotFound(id))?;
        member.disconnect().await;
        tracing::info!(member = %member.addr(), "fleet member removed");
        Ok(())
    }

    /// Connected members.
    pub fn members(&self) -> Vec<Arc<FleetMember>> {
        self.members.read().values().cloned().collect()
    }

    /// One connected member.
    pub fn member(&self, id: NodeId) -> ClusterResult<Arc<FleetMember>> {
        self.members
            .read()
            .get(&id)
            .cloned()
            .ok_or(ClusterError::MemberNotFound(id))
    }

    /// Nodes waiting for a connection.
    pub fn pending(&self) -> Vec<NodeId> {
        self.pending.lock().keys().copied().collect()
    }

    /// Health-check every member concurrently.
    pub async fn health_sweep(&self) -> Vec<(NodeId, ClusterResult<ControlReply>)> {
        let members = self.members();
        let checks = members.iter().map(|member| async move {
            let result = member.health_check().await;
            if let Err(e) = &result {
                tracing::warn!(member = %member.addr(), error = %e, "health check failed");
            }
            (member.id(), result)
        });
        join_all(checks).await
    }

    /// Push `update` to every member, one task each.
    pub fn distribute(&self, update: &FleetUpdate) -> Vec<JoinHandle<()>> {
        self.members()
            .into_iter()
            .map(|member| tokio::spawn(push(member, update.clone())))
            .collect()
    }

    /// Run the worker that drains the mailbox until it is closed.
    pub fn spawn_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(update) = this.mailbox.take().await {
                tracing::debug!(version = update.version, "distributing ring");
                this.track(&update.ring);
                *this.latest.write() = Some(update.clone());
                this.distribute(&update);

                if !this.pending.lock().is_empty() {
                    let this = Arc::clone(&this);
                    tokio::spawn(async move {
                        this.connect_pending().await;
                    });
                }
            }
            tracing::info!("fleet worker stopped");
        })
    }
}

async fn push(member: Arc<FleetMember>, update: FleetUpdate) {
    match member.push_ring_update(&update.ring_bytes, update.version).await {
        Ok(true) => {
            tracing::info!(member = %member.addr(), version = update.version, "ring pushed")
        }
        Ok(false) => {
            tracing::debug!(member = %member.addr(), version = update.version, "member already current")
        }
        Err(e) => {
            let fail_count = member.fail_count().await;
            tracing::warn!(
                member = %member.addr(),
                version = update.version,
                fail_count,
                error = %e,
                "ring push failed"
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringkeeper_core::{Builder, NodeSpec};

    fn node_with(addr: &str) -> Node {
        let mut builder = Builder::new(1);
        let id = builder
            .add_node(NodeSpec {
                tiers: vec!["server1".into()],
                addresses: vec![addr.to_string()],
                ..Default::default()
            })
            .unwrap()
            .id();
        builder.ring().node(id).cloned().unwrap()
    }

    fn update_of(ring: Ring) -> FleetUpdate {
        FleetUpdate {
            version: ring.version(),
            ring_bytes: ring.encode().unwrap().into(),
            ring: Arc::new(ring),
        }
    }

    #[test]
    fn test_control_addr() {
        assert_eq!(
            control_addr(&node_with("10.0.0.2:8001"), 4444).as_deref(),
            Some("10.0.0.2:4444")
        );
        assert_eq!(
            control_addr(&node_with("[fd00::2]:8001"), 4444).as_deref(),
            Some("[fd00::2]:4444")
        );
        assert_eq!(
            control_addr(&node_with("store-1.example:8001"), 9).as_deref(),
            Some("store-1.example:9")
        );
    }

    #[tokio::test]
    async fn test_unreachable_nodes_stay_pending() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut builder = Builder::new(1);
        let id = builder
            .add_node(NodeSpec {
                tiers: vec!["server1".into()],
                addresses: vec!["127.0.0.1:8001".into()],
                ..Default::default()
            })
            .unwrap()
            .id();
        let fleet = FleetDistributor::new(Transport::plaintext(), port, Arc::new(Mailbox::new()));
        assert_eq!(fleet.bootstrap(update_of(builder.ring())).await, 0);
        assert_eq!(fleet.pending(), vec![id]);
        assert!(matches!(
            fleet.member(id),
            Err(ClusterError::MemberNotFound(_))
        ));

        // The node leaving the ring clears it from pending.
        builder.remove_node(id);
        fleet.reconcile(update_of(builder.ring())).await;
        assert!(fleet.pending().is_empty());
    }
}
