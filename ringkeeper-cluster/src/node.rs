//! ServiceNode - runs one configured ring service in its role.

use crate::config::{ClusterConfig, Role};
use crate::error::{ClusterError, ClusterResult};
use crate::manager::RingManager;
use crate::proto::ring_control_server::RingControlServer;
use crate::proto::ring_replica_server::RingReplicaServer;
use crate::replica::ReplicaServer;
use crate::service::RingControlService;
use crate::storage::FileRingStorage;
use crate::transport;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;

/// One ring service bound to its listen address.
///
/// A master serves `RingControl` over a [`RingManager`]; a replica serves
/// `RingReplica` over a [`ReplicaServer`].
pub struct ServiceNode {
    service: String,
    role: Role,
    local_addr: SocketAddr,
    manager: Option<Arc<RingManager>>,
    replica: Option<Arc<ReplicaServer>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
}

impl ServiceNode {
    /// Load the ring, bind and start serving.
    pub async fn start(config: ClusterConfig) -> ClusterResult<Self> {
        config.validate()?;

        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .map_err(|e| ClusterError::Config(format!("cannot bind {}: {e}", config.listen_addr)))?;
        let local_addr = listener.local_addr()?;

        let mut builder = transport::server_builder(&config)?;
        let (router, manager, replica) = match config.role {
            Role::Master => {
                let manager = RingManager::start(config.clone()).await?;
                let router = builder.add_service(RingControlServer::new(RingControlService::new(
                    Arc::clone(&manager),
                )));
                (router, Some(manager), None)
            }
            Role::Replica => {
                let storage = FileRingStorage::new(&config.ring_dir, config.service.as_str())?;
                let replica = Arc::new(ReplicaServer::new(Arc::new(storage)));
                let router = builder.add_service(RingReplicaServer::from_arc(Arc::clone(&replica)));
                (router, None, Some(replica))
            }
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let service = config.service.clone();
        let server = tokio::spawn(async move {
            let incoming = TcpListenerStream::new(listener);
            let result = router
                .serve_with_incoming_shutdown(incoming, async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(service = %service, error = %e, "gRPC server failed");
            }
        });

        tracing::info!(
            service = %config.service,
            role = ?config.role,
            addr = %local_addr,
            "ring service started"
        );

        Ok(Self {
            service: config.service,
            role: config.role,
            local_addr,
            manager,
            replica,
            shutdown_tx: Some(shutdown_tx),
            server: Some(server),
        })
    }

    /// Service name.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Role this node runs in.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Address the gRPC server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The ring manager, for a master.
    pub fn manager(&self) -> Option<&Arc<RingManager>> {
        self.manager.as_ref()
    }

    /// The replica store, for a replica.
    pub fn replica(&self) -> Option<&Arc<ReplicaServer>> {
        self.replica.as_ref()
    }

    /// Stop serving and wait for the server to finish.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(manager) = &self.manager {
            manager.shutdown();
        }
        if let Some(server) = self.server.take() {
            let _ = server.await;
        }
        tracing::info!(service = %self.service, "ring service stopped");
    }
}
