//! pithos-services: node-owned state and the contracts a node is built from.
//! Nothing in this crate performs I/O.

pub mod component;
pub mod metrics;
pub mod rpc;
pub mod storage;
pub mod transport;

pub use component::{
    Application, Components, DhtStorage, Emission, GroupStorage, NodeRole, Outbox, PeerLogic,
    Port, SuperPeer,
};
pub use metrics::{MemoryMetrics, MetricsSink, TracingMetrics, TrafficCounters, TrafficSnapshot};
pub use rpc::{
    CallContext, CallRequest, Completed, PendingCall, RpcListener, RpcStats, RpcTable,
    TimeoutEvent, Transmission,
};
pub use storage::{StorageEntry, StorageQueue, QUEUE_LENGTH_METRIC};
pub use transport::{Bootstrap, Overlay, ReadyFlag, Transport};
