//! RingControl gRPC implementation for operators and registering nodes.

use crate::error::ClusterError;
use crate::manager::RingManager;
use crate::proto::ring_control_server::RingControl;
use crate::proto::{
    self, Conf, Empty, ModifyRequest, NodeConfig, NodeId as NodeIdMsg, NodeQuery,
    NodeSoftwareVersion, NodeUpgrade, NodeUpgradeStatus, RegisterRequest, RingBytes, RingConf,
    RingEvent, RingStatus, SearchResult, SetActiveRequest, SubscriberId,
};
use crate::registration::Registration;
use ringkeeper_core::{Node, NodeFilter, NodeSpec, RingError, RingVersion};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

/// Buffered events per ring-stream subscriber.
const STREAM_BUFFER: usize = 16;

impl From<&Node> for proto::Node {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id(),
            active: node.active(),
            capacity: node.capacity(),
            tiers: node.tiers().to_vec(),
            addresses: node.addresses().to_vec(),
            meta: node.meta().to_string(),
            conf: node.conf().to_vec(),
        }
    }
}

impl From<proto::Node> for NodeSpec {
    fn from(node: proto::Node) -> Self {
        Self {
            active: node.active,
            capacity: node.capacity,
            tiers: node.tiers,
            addresses: node.addresses,
            meta: node.meta,
            conf: node.conf,
        }
    }
}

impl From<RegisterRequest> for Registration {
    fn from(req: RegisterRequest) -> Self {
        Self {
            hostname: req.hostname,
            addrs: req.addrs,
            tiers: req.tiers,
            hardware_id: req.hardware_id,
        }
    }
}

/// Translate a query into filters. Every populated field narrows the result.
pub fn query_filters(query: NodeQuery) -> Result<Vec<NodeFilter>, RingError> {
    let mut filters = Vec::new();
    if query.id != 0 {
        filters.push(NodeFilter::id(query.id));
    }
    if !query.meta.is_empty() {
        filters.push(NodeFilter::meta_contains(query.meta));
    }
    for (level, tier) in query.tiers.into_iter().enumerate() {
        if !tier.is_empty() {
            filters.push(NodeFilter::tier_prefix(level, tier));
        }
    }
    for (index, addr) in query.addresses.into_iter().enumerate() {
        if !addr.is_empty() {
            filters.push(NodeFilter::address_prefix(index, addr));
        }
    }
    for expr in &query.filters {
        filters.push(expr.parse()?);
    }
    Ok(filters)
}

fn ring_status(version: RingVersion) -> Response<RingStatus> {
    Response::new(RingStatus {
        status: true,
        version,
    })
}

fn ring_conf(conf: Vec<u8>, version: RingVersion) -> Response<RingConf> {
    Response::new(RingConf {
        status: Some(RingStatus {
            status: true,
            version,
        }),
        conf: Some(Conf {
            conf,
            restart_required: false,
        }),
    })
}

/// gRPC service for the master's control plane.
pub struct RingControlService {
    manager: Arc<RingManager>,
}

impl RingControlService {
    /// Create a service over a running manager.
    pub fn new(manager: Arc<RingManager>) -> Self {
        Self { manager }
    }
}

#[tonic::async_trait]
impl RingControl for RingControlService {
    async fn add_node(&self, request: Request<proto::Node>) -> Result<Response<RingStatus>, Status> {
        let (_, version) = self.manager.add_node(request.into_inner().into()).await?;
        Ok(ring_status(version))
    }

    async fn remove_node(
        &self,
        request: Request<NodeIdMsg>,
    ) -> Result<Response<RingStatus>, Status> {
        let version = self.manager.remove_node(request.into_inner().id).await?;
        Ok(ring_status(version))
    }

    async fn modify_node(
        &self,
        request: Request<ModifyRequest>,
    ) -> Result<Response<RingStatus>, Status> {
        tracing::debug!(node = request.get_ref().id, "modify node is not supported; ignoring");
        Ok(ring_status(self.manager.version()))
    }

    async fn set_active(
        &self,
        request: Request<SetActiveRequest>,
    ) -> Result<Response<RingStatus>, Status> {
        let req = request.get_ref();
        tracing::debug!(node = req.id, active = req.active, "set active is not supported; ignoring");
        Ok(ring_status(self.manager.version()))
    }

    async fn set_config(&self, request: Request<Conf>) -> Result<Response<RingStatus>, Status> {
        let conf = request.into_inner();
        if conf.restart_required {
            tracing::info!("config change requests a restart; members restart on their own");
        }
        let version = self.manager.set_config(conf.conf).await?;
        Ok(ring_status(version))
    }

    async fn get_version(&self, _request: Request<Empty>) -> Result<Response<RingStatus>, Status> {
        Ok(ring_status(self.manager.version()))
    }

    async fn get_global_config(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<RingConf>, Status> {
        let (conf, version) = self.manager.global_config();
        Ok(ring_conf(conf, version))
    }

    async fn search_nodes(
        &self,
        request: Request<NodeQuery>,
    ) -> Result<Response<SearchResult>, Status> {
        let filters = query_filters(request.into_inner()).map_err(ClusterError::from)?;
        let nodes = self
            .manager
            .search(&filters)
            .iter()
            .map(proto::Node::from)
            .collect();
        Ok(Response::new(SearchResult { nodes }))
    }

    async fn get_node_config(
        &self,
        request: Request<NodeIdMsg>,
    ) -> Result<Response<RingConf>, Status> {
        let (conf, version) = self.manager.node_config(request.into_inner().id)?;
        Ok(ring_conf(conf, version))
    }

    async fn get_ring(&self, _request: Request<Empty>) -> Result<Response<RingBytes>, Status> {
        let (ring, version) = self.manager.ring();
        Ok(Response::new(RingBytes {
            version,
            ring: ring.to_vec(),
        }))
    }

    async fn register_node(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<NodeConfig>, Status> {
        let registration: Registration = request.into_inner().into();
        let (local_id, ring) = self.manager.register(registration).await.map_err(|e| {
            tracing::warn!(error = %e, "registration rejected");
            e
        })?;
        Ok(Response::new(NodeConfig {
            local_id,
            ring: ring.to_vec(),
        }))
    }

    type GetRingStreamStream = ReceiverStream<Result<RingEvent, Status>>;

    async fn get_ring_stream(
        &self,
        request: Request<SubscriberId>,
    ) -> Result<Response<Self::GetRingStreamStream>, Status> {
        let subscriber = request.into_inner().id;
        // Subscribe before reading the version so no commit falls in between.
        let mut events = self.manager.subscribe();
        let current = self.manager.version();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        tracing::info!(subscriber = %subscriber, version = current, "ring stream opened");
        tokio::spawn(async move {
            if tx.send(Ok(RingEvent { version: current })).await.is_err() {
                return;
            }
            loop {
                let version = tokio::select! {
                    _ = tx.closed() => break,
                    event = events.recv() => match event {
                        Ok(version) => version,
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(subscriber = %subscriber, skipped, "ring stream lagged");
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    },
                };
                if tx.send(Ok(RingEvent { version })).await.is_err() {
                    break;
                }
            }
            tracing::debug!(subscriber = %subscriber, "ring stream closed");
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn get_node_software_version(
        &self,
        request: Request<NodeIdMsg>,
    ) -> Result<Response<NodeSoftwareVersion>, Status> {
        let version = self
            .manager
            .node_software_version(request.into_inner().id)
            .await?;
        Ok(Response::new(NodeSoftwareVersion { version }))
    }

    async fn node_upgrade_software_version(
        &self,
        request: Request<NodeUpgrade>,
    ) -> Result<Response<NodeUpgradeStatus>, Status> {
        let req = request.into_inner();
        let reply = self
            .manager
            .upgrade_node_software(req.id, &req.version)
            .await?;
        Ok(Response::new(NodeUpgradeStatus {
            status: reply.status,
            msg: reply.msg,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_filters() {
        let filters = query_filters(NodeQuery {
            id: 0,
            meta: "server1".into(),
            tiers: vec![String::new(), "zone".into()],
            addresses: vec!["10.0.0.".into()],
            filters: vec!["tier0=server1".into()],
        })
        .unwrap();
        assert_eq!(
            filters,
            vec![
                NodeFilter::meta_contains("server1"),
                NodeFilter::tier_prefix(1, "zone"),
                NodeFilter::address_prefix(0, "10.0.0."),
                NodeFilter::tier_eq(0, "server1"),
            ]
        );

        assert_eq!(
            query_filters(NodeQuery {
                id: 7,
                ..Default::default()
            })
            .unwrap(),
            vec![NodeFilter::id(7)]
        );

        let err = query_filters(NodeQuery {
            filters: vec!["colour=blue".into()],
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, RingError::InvalidFilter { .. }));
    }
}
