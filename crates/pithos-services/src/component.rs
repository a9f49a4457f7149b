//! Role sub-components and their contract with the communicator.
//!
//! The communicator owns every sub-component of its node and calls into
//! them synchronously, one event at a time. Components never call back into
//! the communicator; anything they want to send goes into the `Outbox`,
//! which the communicator drains in order after the current event.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use anyhow::Result;
use pithos_core::{
    CallId, CallOrigin, CallPayload, CallTarget, Component, InboundCall, OverlayKey,
    ResponsePayload, Unit,
};

use crate::rpc::CallContext;

/// Logical port a unit arrives on at the communicator. Key-addressed
/// deliveries from the overlay carry a key and have their own entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    /// Downward from the application tier.
    Application,
    /// Upward from the peer logic toward the application tier.
    PeerUpward,
    /// Received from the transport.
    TransportIn,
    /// From the super peer, bound for the network.
    SuperPeer,
    /// From the peer logic, bound for the network.
    PeerGroup,
    /// From group storage, bound for the network.
    GroupStorage,
}

/// Something a component asked the communicator to do.
#[derive(Debug)]
pub enum Emission {
    Unit {
        port: Port,
        unit: Unit,
    },
    /// Issue a call whose outcome comes back to the issuing role.
    Call {
        target: CallTarget,
        payload: CallPayload,
        context: Option<CallContext>,
    },
    Response {
        origin: CallOrigin,
        call_id: CallId,
        response: ResponsePayload,
    },
}

/// FIFO of emissions produced while handling one event.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: VecDeque<Emission>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&mut self, port: Port, unit: Unit) {
        self.queue.push_back(Emission::Unit { port, unit });
    }

    pub fn call(&mut self, target: CallTarget, payload: CallPayload, context: Option<CallContext>) {
        self.queue.push_back(Emission::Call {
            target,
            payload,
            context,
        });
    }

    pub fn respond(&mut self, origin: CallOrigin, call_id: CallId, response: ResponsePayload) {
        self.queue.push_back(Emission::Response {
            origin,
            call_id,
            response,
        });
    }

    pub fn pop(&mut self) -> Option<Emission> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Tier-2 logic of an ordinary peer.
pub trait PeerLogic: Send {
    /// A unit handed down by the application tier.
    fn handle_unit(&mut self, unit: Unit, outbox: &mut Outbox) -> Result<()>;

    /// Object put/get calls addressed to this node. Returns the call when
    /// this component does not handle its type.
    fn handle_call(&mut self, call: InboundCall, _outbox: &mut Outbox) -> Result<(), InboundCall> {
        Err(call)
    }
}

/// Storage shared among the members of a peer group.
pub trait GroupStorage: Send {
    fn handle_unit(&mut self, unit: Unit, outbox: &mut Outbox) -> Result<()>;

    fn ping_response(
        &mut self,
        call_id: CallId,
        context: Option<CallContext>,
        rtt: Duration,
        outbox: &mut Outbox,
    );

    fn ping_timeout(
        &mut self,
        call_id: CallId,
        target: CallTarget,
        context: Option<CallContext>,
        outbox: &mut Outbox,
    );

    fn handle_call(&mut self, call: InboundCall, _outbox: &mut Outbox) -> Result<(), InboundCall> {
        Err(call)
    }
}

/// Group coordinator; only present on super peers.
pub trait SuperPeer: Send {
    /// A unit from a group member, received over the transport.
    fn handle_group_unit(&mut self, unit: Unit, outbox: &mut Outbox) -> Result<()>;

    /// A unit the overlay delivered to this node under `key`.
    fn handle_overlay_unit(&mut self, key: OverlayKey, unit: Unit, outbox: &mut Outbox)
        -> Result<()>;

    fn handle_call(&mut self, call: InboundCall, _outbox: &mut Outbox) -> Result<(), InboundCall> {
        Err(call)
    }
}

/// Receives outcomes of calls the node issued without a dedicated listener.
pub trait DhtStorage: Send {
    fn handle_response(
        &mut self,
        call_id: CallId,
        response: ResponsePayload,
        context: Option<CallContext>,
        rtt: Duration,
        outbox: &mut Outbox,
    );

    fn handle_timeout(
        &mut self,
        call_id: CallId,
        target: CallTarget,
        context: Option<CallContext>,
        outbox: &mut Outbox,
    );

    fn handle_call(&mut self, call: InboundCall, _outbox: &mut Outbox) -> Result<(), InboundCall> {
        Err(call)
    }
}

/// The tier above the node.
pub trait Application: Send {
    fn deliver(&mut self, unit: Unit) -> Result<()>;
}

/// What a node is, derived from which sub-components it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Peer,
    SuperPeer,
    GroupStorageMember,
}

/// The sub-components of one node, fixed at construction.
#[derive(Default)]
pub struct Components {
    pub application: Option<Box<dyn Application>>,
    pub peer_logic: Option<Box<dyn PeerLogic>>,
    pub group_storage: Option<Box<dyn GroupStorage>>,
    pub super_peer: Option<Box<dyn SuperPeer>>,
    pub dht_storage: Option<Box<dyn DhtStorage>>,
}

impl Components {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_application(mut self, application: impl Application + 'static) -> Self {
        self.application = Some(Box::new(application));
        self
    }

    pub fn with_peer_logic(mut self, peer_logic: impl PeerLogic + 'static) -> Self {
        self.peer_logic = Some(Box::new(peer_logic));
        self
    }

    pub fn with_group_storage(mut self, group_storage: impl GroupStorage + 'static) -> Self {
        self.group_storage = Some(Box::new(group_storage));
        self
    }

    pub fn with_super_peer(mut self, super_peer: impl SuperPeer + 'static) -> Self {
        self.super_peer = Some(Box::new(super_peer));
        self
    }

    pub fn with_dht_storage(mut self, dht_storage: impl DhtStorage + 'static) -> Self {
        self.dht_storage = Some(Box::new(dht_storage));
        self
    }

    /// Super peer wins over group storage; a node with neither is a plain peer.
    pub fn role(&self) -> NodeRole {
        if self.super_peer.is_some() {
            NodeRole::SuperPeer
        } else if self.group_storage.is_some() {
            NodeRole::GroupStorageMember
        } else {
            NodeRole::Peer
        }
    }

    pub fn has(&self, component: Component) -> bool {
        match component {
            Component::Communicator => true,
            Component::Application => self.application.is_some(),
            Component::PeerLogic => self.peer_logic.is_some(),
            Component::GroupStorage => self.group_storage.is_some(),
            Component::SuperPeer => self.super_peer.is_some(),
            Component::DhtStorage => self.dht_storage.is_some(),
        }
    }
}

impl fmt::Debug for Components {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Components")
            .field("application", &self.application.is_some())
            .field("peer_logic", &self.peer_logic.is_some())
            .field("group_storage", &self.group_storage.is_some())
            .field("super_peer", &self.super_peer.is_some())
            .field("dht_storage", &self.dht_storage.is_some())
            .finish()
    }
}
