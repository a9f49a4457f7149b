//! Whole nodes: the store-via-overlay path and several node actors
//! talking over the in-process fabric.

use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use pithos_core::{derive_key, OverlayKey, PayloadType, StoredObject, Unit};
use pithos_services::{Components, MemoryMetrics};
use pithosd::{node, CallOptions, LocalFabric, Node, NodeHandle, NodeReport, RouteError};

use crate::*;

type NodeTask = JoinHandle<std::result::Result<NodeReport, RouteError>>;

fn spawn_node(
    fabric: &LocalFabric,
    last: u8,
    key: OverlayKey,
    components: Components,
    shutdown: &broadcast::Sender<()>,
) -> (NodeHandle, NodeTask) {
    let (handle, inbox) = node::channel(taddr(last));
    let communicator = Communicator::new(
        taddr(last),
        components,
        Box::new(fabric.transport(addr(last))),
        Box::new(fabric.overlay()),
        Arc::new(ReadyFlag::new(true)),
        &PithosConfig::default(),
    );
    fabric.register(addr(last), key, handle.clone());
    let task = tokio::spawn(
        Node::new(
            communicator,
            inbox,
            shutdown.subscribe(),
            Arc::new(MemoryMetrics::new()),
        )
        .run(),
    );
    (handle, task)
}

/// Poll `done` until it holds, failing the test after two seconds.
async fn eventually(what: &str, done: impl Fn() -> bool) {
    for _ in 0..400 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

#[test]
fn test_save1_is_routed_once_under_its_derived_key() {
    let mut t = TestNode::new(Components::new().with_peer_logic(PassThroughPeer));
    let object = StoredObject::new("save1", 8192).unwrap();

    t.node
        .route(pithos_services::Port::Application, Unit::overlay_store(object.clone()))
        .unwrap();
    t.node.pump(Instant::now()).unwrap();

    let routed = take(&t.overlay.0);
    assert_eq!(routed.len(), 1);
    let (key, unit) = &routed[0];
    assert_eq!(*key, derive_key("save1"));
    assert_eq!(*unit, Unit::overlay_store(object));
    assert_eq!(count(&t.transport.0), 0);
    assert_eq!(t.node.snapshot().packets_sent, 0);
}

#[test]
fn test_derived_keys_are_stable() {
    assert_eq!(derive_key("save1"), derive_key("save1"));
    assert_eq!(derive_key("save1"), StoredObject::new("save1", 1).unwrap().key());
    assert_ne!(derive_key("save1"), derive_key("save2"));
}

#[tokio::test]
async fn test_overlay_store_reaches_the_closest_super_peer() {
    let fabric = LocalFabric::new();
    let (shutdown, _) = broadcast::channel(1);

    let near = RecordingSuperPeer::default();
    let far = RecordingSuperPeer::default();
    let (peer, peer_task) = spawn_node(
        &fabric,
        1,
        derive_key("peer"),
        Components::new()
            .with_peer_logic(PassThroughPeer)
            .with_group_storage(RecordingGroupStorage::default()),
        &shutdown,
    );
    let (_near, near_task) = spawn_node(
        &fabric,
        2,
        derive_key("save1"),
        Components::new()
            .with_group_storage(RecordingGroupStorage::default())
            .with_super_peer(near.clone()),
        &shutdown,
    );
    let (_far, far_task) = spawn_node(
        &fabric,
        3,
        derive_key("elsewhere"),
        Components::new()
            .with_group_storage(RecordingGroupStorage::default())
            .with_super_peer(far.clone()),
        &shutdown,
    );

    peer.submit(Unit::overlay_store(StoredObject::new("save1", 64).unwrap()))
        .unwrap();
    eventually("overlay delivery", || count(&near.overlay) == 1).await;

    let delivered = take(&near.overlay);
    assert_eq!(delivered[0].0, derive_key("save1"));
    assert_eq!(delivered[0].1.object.as_ref().map(StoredObject::name), Some("save1"));
    assert_eq!(count(&far.overlay), 0);

    shutdown.send(()).unwrap();
    for task in [peer_task, near_task, far_task] {
        task.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_ping_between_nodes_reaches_group_storage() {
    let fabric = LocalFabric::new();
    let (shutdown, _) = broadcast::channel(1);

    let storage = RecordingGroupStorage::default();
    let (a, a_task) = spawn_node(
        &fabric,
        1,
        derive_key("a"),
        Components::new().with_group_storage(storage.clone()),
        &shutdown,
    );
    let (b, b_task) = spawn_node(
        &fabric,
        2,
        derive_key("b"),
        Components::new().with_group_storage(RecordingGroupStorage::default()),
        &shutdown,
    );

    a.ping(b.address(), CallOptions::default()).unwrap();
    eventually("pong", || count(&storage.pings) == 1).await;
    assert!(matches!(take(&storage.pings)[0], PingOutcome::Answered(_)));

    // Units go over the fabric too and are counted on both sides.
    a.route(
        pithos_services::Port::GroupStorage,
        Unit::new(PayloadType::Inform, b.address(), 77),
    )
    .unwrap();
    let mut received = 0;
    for _ in 0..400 {
        received = b.snapshot().await.unwrap().bytes_received;
        if received == 77 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(received, 77);

    shutdown.send(()).unwrap();
    let a_report = a_task.await.unwrap().unwrap();
    b_task.await.unwrap().unwrap();
    assert_eq!(a_report.traffic.packets_sent, 1);
    assert_eq!(a_report.traffic.bytes_sent, 77);
    assert!(!a_report.rates_published);
}

#[tokio::test]
async fn test_ping_to_absent_node_times_out() {
    let fabric = LocalFabric::new();
    let (shutdown, _) = broadcast::channel(1);
    let storage = RecordingGroupStorage::default();
    let (a, a_task) = spawn_node(
        &fabric,
        1,
        derive_key("a"),
        Components::new().with_group_storage(storage.clone()),
        &shutdown,
    );

    a.ping(
        taddr(200),
        CallOptions::default()
            .with_timeout(Duration::from_millis(20))
            .with_retries(1),
    )
    .unwrap();
    eventually("ping timeout", || count(&storage.pings) == 1).await;
    assert!(matches!(take(&storage.pings)[0], PingOutcome::TimedOut(_)));

    shutdown.send(()).unwrap();
    a_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_fatal_error_stops_only_the_failing_node() {
    let fabric = LocalFabric::new();
    let (shutdown, _) = broadcast::channel(1);
    let (a, a_task) = spawn_node(
        &fabric,
        1,
        derive_key("a"),
        Components::new().with_group_storage(RecordingGroupStorage::default()),
        &shutdown,
    );
    let (b, b_task) = spawn_node(
        &fabric,
        2,
        derive_key("b"),
        Components::new().with_group_storage(RecordingGroupStorage::default()),
        &shutdown,
    );

    let mut datagram = wire::encode(&Frame::Packet(Unit::new(PayloadType::Write, taddr(1), 1)))
        .unwrap()
        .to_vec();
    datagram[2] = 0x7F;
    a.datagram(addr(2), datagram.into()).unwrap();

    let err = a_task.await.unwrap().unwrap_err();
    assert!(matches!(err, RouteError::UnknownMessageType(0x7F)));
    assert!(a.is_closed());
    assert!(b.snapshot().await.is_ok());

    shutdown.send(()).unwrap();
    b_task.await.unwrap().unwrap();
}
