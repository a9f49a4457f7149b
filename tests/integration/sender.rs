//! Egress through the transport sender and end-of-life statistics.

use std::time::{Duration, Instant};

use pithos_core::{PayloadType, Unit};
use pithos_services::{Components, MemoryMetrics, Port, TrafficSnapshot};
use pithosd::communicator::{RECEIVED_BYTES_RATE, SENT_BYTES_RATE, SENT_PACKETS_RATE};
use pithosd::RouteError;

use crate::*;

#[test]
fn test_unit_without_destination_is_never_transmitted() {
    let mut t = TestNode::new(Components::new());
    let err = t
        .node
        .route(
            Port::PeerGroup,
            Unit::new(PayloadType::Inform, TransportAddress::UNSPECIFIED, 12),
        )
        .unwrap_err();
    assert!(matches!(err, RouteError::UnspecifiedDestination));
    assert_eq!(count(&t.transport.0), 0);
    assert_eq!(t.node.snapshot(), TrafficSnapshot::default());
}

#[test]
fn test_units_sent_before_bootstrap_are_refused() {
    let mut t = TestNode::new(Components::new());
    t.ready.set_ready(false);
    let err = t
        .node
        .route(Port::GroupStorage, Unit::new(PayloadType::Write, taddr(2), 12))
        .unwrap_err();
    assert!(matches!(err, RouteError::UnderlayNotReady));
    assert_eq!(count(&t.transport.0), 0);
}

#[test]
fn test_traffic_counters_follow_declared_lengths() {
    let storage = RecordingGroupStorage::default();
    let mut t = TestNode::new(Components::new().with_group_storage(storage));

    t.node
        .route(Port::GroupStorage, Unit::new(PayloadType::Write, taddr(2), 1000))
        .unwrap();
    t.node
        .route(Port::GroupStorage, Unit::new(PayloadType::Replicate, taddr(3), 24))
        .unwrap();
    t.receive(addr(2), Unit::new(PayloadType::Response, taddr(1), 500))
        .unwrap();

    assert_eq!(
        t.node.snapshot(),
        TrafficSnapshot {
            packets_sent: 2,
            packets_received: 1,
            bytes_sent: 1024,
            bytes_received: 500,
        }
    );
}

#[test]
fn test_short_lived_node_publishes_no_rates() {
    let t = TestNode::new(Components::new());
    let metrics = MemoryMetrics::new();
    let created = t.node.creation_time();

    assert!(!t.node.finish(created + Duration::from_secs(29), &metrics));
    assert!(metrics.observations().is_empty());
}

#[test]
fn test_rates_use_lifetime_in_seconds() {
    let mut config = PithosConfig::default();
    config.stats.min_measured_secs = 1;
    let storage = RecordingGroupStorage::default();
    let mut t = TestNode::with_config(Components::new().with_group_storage(storage), &config);

    for _ in 0..4 {
        t.node
            .route(Port::GroupStorage, Unit::new(PayloadType::Write, taddr(2), 250))
            .unwrap();
    }
    t.receive(addr(2), Unit::new(PayloadType::Write, taddr(1), 100))
        .unwrap();

    let metrics = MemoryMetrics::new();
    let end = t.node.creation_time() + Duration::from_secs(2);
    assert!(t.node.finish(end, &metrics));
    assert_eq!(metrics.last(SENT_PACKETS_RATE), Some(2.0));
    assert_eq!(metrics.last(SENT_BYTES_RATE), Some(500.0));
    assert_eq!(metrics.last(RECEIVED_BYTES_RATE), Some(50.0));
    assert_eq!(metrics.observations().len(), 4);
}

#[test]
fn test_finish_before_creation_publishes_nothing() {
    let mut config = PithosConfig::default();
    config.stats.min_measured_secs = 0;
    let t = TestNode::with_config(Components::new(), &config);
    let metrics = MemoryMetrics::new();

    let before = t.node.creation_time() - Duration::from_millis(1);
    assert!(!t.node.finish(before, &metrics));
    assert!(t.node.finish(Instant::now() + Duration::from_secs(1), &metrics));
}
