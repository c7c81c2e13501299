//! RingControl behaviour against a master with no replicas.

mod common;

use common::{TestMaster, SERVICE};
use ringkeeper_cluster::proto::{
    self, Conf, Empty, ModifyRequest, NodeId, NodeQuery, RegisterRequest, SetActiveRequest,
    SubscriberId,
};
use ringkeeper_core::{NodeSet, Ring};
use tokio_stream::StreamExt;
use tonic::Code;

fn server3() -> proto::Node {
    proto::Node {
        id: 0,
        active: true,
        capacity: 50,
        tiers: vec!["server3".into(), "zone3".into()],
        addresses: vec!["10.0.0.3:8001".into()],
        meta: "server3|hw3".into(),
        conf: Vec::new(),
    }
}

fn query(filter: &str) -> NodeQuery {
    NodeQuery {
        filters: vec![filter.to_string()],
        ..Default::default()
    }
}

fn register_server2() -> RegisterRequest {
    RegisterRequest {
        hostname: "server2".into(),
        addrs: vec!["10.0.0.2/32".into()],
        tiers: vec!["server2".into(), "zone2".into()],
        hardware_id: "hw-server2".into(),
    }
}

/// Each successful mutation bumps the version and rewrites the canonical files.
#[tokio::test]
async fn test_version_increments_and_canonical_files() {
    let mut master = TestMaster::start().await;
    let v = master.initial_version;

    let status = master.client.get_version(Empty {}).await.unwrap().into_inner();
    assert_eq!(status.version, v);

    let status = master.client.add_node(server3()).await.unwrap().into_inner();
    assert!(status.status);
    assert_eq!(status.version, v + 1);

    let (ring, _) = master.canonical();
    assert_eq!(Ring::decode(&ring).unwrap().version(), v + 1);
    let versioned = master.dir.path().join(format!("{}-{SERVICE}.ring", v + 1));
    assert!(versioned.is_file());

    let status = master
        .client
        .set_config(Conf {
            conf: b"replicas=3".to_vec(),
            restart_required: false,
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(status.version, v + 2);

    let global = master
        .client
        .get_global_config(Empty {})
        .await
        .unwrap()
        .into_inner();
    assert_eq!(global.status.unwrap().version, v + 2);
    assert_eq!(global.conf.unwrap().conf, b"replicas=3");

    let found = master
        .client
        .search_nodes(query("tier0=server3"))
        .await
        .unwrap()
        .into_inner()
        .nodes;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].capacity, 50);

    let ring = master.client.get_ring(Empty {}).await.unwrap().into_inner();
    assert_eq!(ring.version, v + 2);
    assert_eq!(Ring::decode(&ring.ring).unwrap().nodes().len(), 3);
}

/// Removing an unknown node fails without a new version; a known one
/// disappears from search.
#[tokio::test]
async fn test_remove_node() {
    let mut master = TestMaster::start().await;
    let v = master.initial_version;

    let err = master
        .client
        .remove_node(NodeId { id: 12345 })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
    assert_eq!(master.manager().version(), v);

    let dummy = master
        .client
        .search_nodes(query("tier0=dummy1"))
        .await
        .unwrap()
        .into_inner()
        .nodes
        .remove(0);

    let status = master
        .client
        .remove_node(NodeId { id: dummy.id })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(status.version, v + 1);

    let found = master
        .client
        .search_nodes(NodeQuery {
            id: dummy.id,
            ..Default::default()
        })
        .await
        .unwrap()
        .into_inner()
        .nodes;
    assert!(found.is_empty());
}

/// Registering the same host twice yields the same node and one version bump.
#[tokio::test]
async fn test_register_node_is_idempotent() {
    let mut master = TestMaster::start().await;
    let v = master.initial_version;

    let first = master
        .client
        .register_node(register_server2())
        .await
        .unwrap()
        .into_inner();
    let ring = Ring::decode(&first.ring).unwrap();
    assert_eq!(ring.version(), v + 1);

    let node = ring.node(first.local_id).expect("registered node in ring");
    assert_eq!(node.capacity(), 0);
    assert!(!node.active());
    assert_eq!(node.addresses(), ["10.0.0.2:8001".to_string()]);
    assert_eq!(node.meta(), "server2|hw-server2");

    let second = master
        .client
        .register_node(register_server2())
        .await
        .unwrap()
        .into_inner();
    assert_eq!(second.local_id, first.local_id);
    assert_eq!(Ring::decode(&second.ring).unwrap().version(), v + 1);
    assert_eq!(master.manager().version(), v + 1);
}

/// Registration without an allowed address or with a taken tier 0 fails.
#[tokio::test]
async fn test_register_node_rejections() {
    let mut master = TestMaster::start().await;
    let v = master.initial_version;

    let mut request = register_server2();
    request.addrs = vec!["127.0.0.1/8".into(), "192.168.1.5/24".into()];
    let err = master.client.register_node(request).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    let mut request = register_server2();
    request.hostname = "server9".into();
    request.tiers = vec!["server1".into(), "zone9".into()];
    let err = master.client.register_node(request).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    let mut request = register_server2();
    request.tiers = vec!["server2".into(), "rack2".into()];
    let err = master.client.register_node(request).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    assert_eq!(master.manager().version(), v);
}

/// Node config comes back for known nodes only.
#[tokio::test]
async fn test_get_node_config() {
    let mut master = TestMaster::start().await;

    let server1 = master
        .client
        .search_nodes(query("tier0=server1"))
        .await
        .unwrap()
        .into_inner()
        .nodes
        .remove(0);
    let conf = master
        .client
        .get_node_config(NodeId { id: server1.id })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(conf.conf.unwrap().conf, b"server1-conf");

    let err = master
        .client
        .get_node_config(NodeId { id: 999 })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

/// Malformed filter expressions are rejected.
#[tokio::test]
async fn test_search_rejects_bad_filter() {
    let mut master = TestMaster::start().await;
    let err = master
        .client
        .search_nodes(query("colour=blue"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

/// ModifyNode and SetActive answer with the current version and change nothing.
#[tokio::test]
async fn test_modify_and_set_active_do_not_mutate() {
    let mut master = TestMaster::start().await;
    let v = master.initial_version;

    let status = master
        .client
        .modify_node(ModifyRequest {
            id: 1,
            node: Some(server3()),
        })
        .await
        .unwrap()
        .into_inner();
    assert!(status.status);
    assert_eq!(status.version, v);

    let status = master
        .client
        .set_active(SetActiveRequest {
            id: 1,
            active: false,
        })
        .await
        .unwrap()
        .into_inner();
    assert!(status.status);
    assert_eq!(status.version, v);
}

/// The ring stream sends the current version, then every commit.
#[tokio::test]
async fn test_ring_stream() {
    let mut master = TestMaster::start().await;
    let v = master.initial_version;

    let mut stream = master
        .client
        .get_ring_stream(SubscriberId {
            id: "watcher".into(),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(stream.next().await.unwrap().unwrap().version, v);

    master.client.add_node(server3()).await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap().version, v + 1);

    master
        .client
        .register_node(register_server2())
        .await
        .unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap().version, v + 2);
}
