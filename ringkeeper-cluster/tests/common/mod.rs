//! Common test utilities for ringkeeper-cluster tests.

#![allow(dead_code)]

use ringkeeper_cluster::fleet::{CommandHandler, ControlReply, RemoteControlService};
use ringkeeper_cluster::proto::remote_control_server::RemoteControlServer;
use ringkeeper_cluster::proto::ring_control_client::RingControlClient;
use ringkeeper_cluster::proto::ring_replica_server::{RingReplica, RingReplicaServer};
use ringkeeper_cluster::proto::{ReplicaPayload, StoreResult};
use ringkeeper_cluster::{
    ClusterConfig, ClusterError, ClusterResult, FileKind, FileRingStorage, RingManager,
    RingStorage, Role, ServiceNode, Slot,
};
use ringkeeper_core::{Builder, NodeSpec, RingVersion};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::server::Router;
use tonic::transport::{Channel, Server};
use tonic::{Request, Response, Status};

/// Service name used by every test ring.
pub const SERVICE: &str = "objects";

/// A loopback port nothing listens on.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
    listener.local_addr().expect("No local addr").port()
}

/// The two-node ring every test starts from.
///
/// `server1` sits on 127.0.0.1, `dummy1` on 127.0.0.2.
pub fn fixture_builder() -> Builder {
    let mut builder = Builder::new(3);
    builder
        .add_node(NodeSpec {
            active: true,
            capacity: 100,
            tiers: vec!["server1".into(), "zone1".into()],
            addresses: vec!["127.0.0.1:8001".into()],
            meta: "server1|hw1".into(),
            conf: b"server1-conf".to_vec(),
        })
        .expect("Failed to add server1");
    builder
        .add_node(NodeSpec {
            active: true,
            capacity: 100,
            tiers: vec!["dummy1".into(), "zone42".into()],
            addresses: vec!["127.0.0.2:8001".into()],
            meta: "dummy1|hw2".into(),
            conf: Vec::new(),
        })
        .expect("Failed to add dummy1");
    builder
}

/// Write the fixture as the canonical pair in `dir`. Returns its version.
pub fn seed_ring_dir(dir: &Path) -> RingVersion {
    let mut builder = fixture_builder();
    let ring = builder.ring();
    let storage = FileRingStorage::new(dir, SERVICE).expect("Failed to open ring dir");
    storage
        .persist(
            Slot::Canonical,
            FileKind::Builder,
            &builder.encode().expect("encode builder"),
        )
        .expect("Failed to write builder");
    storage
        .persist(
            Slot::Canonical,
            FileKind::Ring,
            &ring.encode().expect("encode ring"),
        )
        .expect("Failed to write ring");
    ring.version()
}

/// Master configuration for a test ring directory.
pub fn master_config(dir: &Path, replicas: Vec<String>, control_port: u16) -> ClusterConfig {
    ClusterConfig::builder()
        .service(SERVICE)
        .listen_addr("127.0.0.1:0")
        .replicas(replicas)
        .net_filter(vec!["10.0.0.0/24".parse().expect("valid network")])
        .ring_dir(dir)
        .control_port(control_port)
        .reconnect_interval_secs(0)
        .build()
        .expect("Failed to build master config")
}

/// Read the canonical ring and builder bytes from `dir`.
pub fn canonical_files(dir: &Path) -> (Vec<u8>, Vec<u8>) {
    let ring = std::fs::read(dir.join(format!("{SERVICE}.ring"))).expect("read canonical ring");
    let builder =
        std::fs::read(dir.join(format!("{SERVICE}.builder"))).expect("read canonical builder");
    (ring, builder)
}

/// Serve `router` on an ephemeral loopback port.
pub async fn spawn_server(router: Router) -> SocketAddr {
    spawn_server_on(router, "127.0.0.1:0").await
}

/// Serve `router` on `bind`.
pub async fn spawn_server_on(router: Router, bind: &str) -> SocketAddr {
    let listener = TcpListener::bind(bind).await.expect("Failed to bind");
    let addr = listener.local_addr().expect("No local addr");
    tokio::spawn(async move {
        let _ = router
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await;
    });
    addr
}

/// Poll `check` until it holds or `limit` elapses.
pub async fn wait_for<F>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// A master serving RingControl over a seeded ring directory.
pub struct TestMaster {
    /// Ring directory (kept alive for the test duration).
    pub dir: TempDir,
    /// The running service.
    pub node: ServiceNode,
    /// Client connected to the master.
    pub client: RingControlClient<Channel>,
    /// Version of the seeded ring.
    pub initial_version: RingVersion,
}

impl TestMaster {
    /// Start a master with no replicas and no reachable fleet.
    pub async fn start() -> Self {
        Self::start_with(Vec::new(), closed_port()).await
    }

    /// Start a master with the given replicas and fleet control port.
    pub async fn start_with(replicas: Vec<String>, control_port: u16) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let initial_version = seed_ring_dir(dir.path());
        let config = master_config(dir.path(), replicas, control_port);
        let node = ServiceNode::start(config)
            .await
            .expect("Failed to start master");
        let client = RingControlClient::connect(format!("http://{}", node.local_addr()))
            .await
            .expect("Failed to connect to master");
        Self {
            dir,
            node,
            client,
            initial_version,
        }
    }

    /// The master's ring manager.
    pub fn manager(&self) -> &Arc<RingManager> {
        self.node.manager().expect("master has a manager")
    }

    /// Canonical ring and builder bytes on disk.
    pub fn canonical(&self) -> (Vec<u8>, Vec<u8>) {
        canonical_files(self.dir.path())
    }
}

/// A replica serving RingReplica over its own directory.
pub struct TestReplica {
    /// Replica ring directory.
    pub dir: TempDir,
    /// The running service.
    pub node: ServiceNode,
}

impl TestReplica {
    /// Start a replica on an ephemeral port.
    pub async fn start() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = ClusterConfig::builder()
            .role(Role::Replica)
            .service(SERVICE)
            .listen_addr("127.0.0.1:0")
            .ring_dir(dir.path())
            .build()
            .expect("Failed to build replica config");
        let node = ServiceNode::start(config)
            .await
            .expect("Failed to start replica");
        Self { dir, node }
    }

    /// Address to list in the master's replicas.
    pub fn addr(&self) -> String {
        self.node.local_addr().to_string()
    }

    /// Version the replica holds.
    pub fn version(&self) -> RingVersion {
        self.node.replica().expect("replica store").version()
    }
}

/// A replica that accepts setup but fails every store.
pub struct FailingReplica;

#[tonic::async_trait]
impl RingReplica for FailingReplica {
    async fn setup(
        &self,
        request: Request<ReplicaPayload>,
    ) -> Result<Response<StoreResult>, Status> {
        Ok(Response::new(StoreResult {
            version: request.into_inner().version,
            ring_stored: true,
            builder_stored: true,
            err_msg: String::new(),
        }))
    }

    async fn store(
        &self,
        _request: Request<ReplicaPayload>,
    ) -> Result<Response<StoreResult>, Status> {
        Err(Status::unavailable("disk full"))
    }
}

/// Start a [`FailingReplica`] and return its address.
pub async fn spawn_failing_replica() -> String {
    let router = Server::builder().add_service(RingReplicaServer::new(FailingReplica));
    spawn_server(router).await.to_string()
}

/// A fleet member that records the rings pushed to it.
#[derive(Debug, Default)]
pub struct RecordingMember {
    /// Number of RingUpdate calls received.
    pub ring_updates: AtomicUsize,
    /// Version of the last ring received.
    pub version: AtomicU64,
    /// How long each ring update takes.
    pub delay: Duration,
    /// Added to the version the member reports back.
    pub version_skew: u64,
}

impl RecordingMember {
    /// A member that sits on every ring update for `delay`.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    /// A member that confirms `skew` versions past what it was sent.
    pub fn skewed(skew: u64) -> Self {
        Self {
            version_skew: skew,
            ..Default::default()
        }
    }

    /// Ring updates received so far.
    pub fn updates(&self) -> usize {
        self.ring_updates.load(Ordering::SeqCst)
    }

    /// Last version received.
    pub fn version(&self) -> RingVersion {
        self.version.load(Ordering::SeqCst)
    }
}

fn ok(msg: &str) -> ClusterResult<ControlReply> {
    Ok(ControlReply {
        status: true,
        msg: msg.to_string(),
    })
}

#[tonic::async_trait]
impl CommandHandler for RecordingMember {
    async fn start(&self) -> ClusterResult<ControlReply> {
        ok("started")
    }

    async fn stop(&self) -> ClusterResult<ControlReply> {
        ok("stopped")
    }

    async fn restart(&self) -> ClusterResult<ControlReply> {
        ok("restarted")
    }

    async fn reload(&self) -> ClusterResult<ControlReply> {
        ok("reloaded")
    }

    async fn health_check(&self) -> ClusterResult<ControlReply> {
        ok("healthy")
    }

    async fn ring_update(
        &self,
        ring: Vec<u8>,
        version: RingVersion,
    ) -> ClusterResult<(RingVersion, RingVersion)> {
        if ring.is_empty() {
            return Err(ClusterError::Validation("empty ring".into()));
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.ring_updates.fetch_add(1, Ordering::SeqCst);
        let old = self.version.swap(version, Ordering::SeqCst);
        Ok((old, version + self.version_skew))
    }

    async fn stats(&self) -> ClusterResult<Vec<u8>> {
        Ok(b"{}".to_vec())
    }

    async fn software_version(&self) -> ClusterResult<String> {
        Ok("1.2.3".to_string())
    }

    async fn upgrade(&self, version: String) -> ClusterResult<ControlReply> {
        Ok(ControlReply {
            status: true,
            msg: format!("upgrading to {version}"),
        })
    }
}

/// Serve a [`RecordingMember`] on 127.0.0.1 and return it with its port.
pub async fn spawn_fleet_member() -> (Arc<RecordingMember>, u16) {
    let (member, addr) = serve_fleet_member(RecordingMember::default(), "127.0.0.1:0").await;
    (member, addr.port())
}

/// Serve `member` on `bind` and return it with its address.
pub async fn serve_fleet_member(
    member: RecordingMember,
    bind: &str,
) -> (Arc<RecordingMember>, SocketAddr) {
    let member = Arc::new(member);
    let router = Server::builder().add_service(RemoteControlServer::new(
        RemoteControlService::new(Arc::clone(&member)),
    ));
    let addr = spawn_server_on(router, bind).await;
    (member, addr)
}
