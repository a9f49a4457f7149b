//! pithosd: the Pithos node: communicator, node actor and transports.

pub mod communicator;
pub mod dispatch;
pub mod error;
pub mod fabric;
pub mod node;
pub mod roles;
pub mod sender;
pub mod udp;

pub use communicator::{
    CallOptions, CallOutcome, Communicator, Destination, Disposition, DropReason, Listener,
    Received, ResponseOutcome,
};
pub use dispatch::{CallDispatcher, Dispatched};
pub use error::{RouteError, SendError};
pub use fabric::{LocalFabric, LoopbackOverlay};
pub use node::{Node, NodeEvent, NodeHandle, NodeReport, NodeStopped};
pub use sender::TransportSender;
