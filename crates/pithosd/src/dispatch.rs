//! Routes inbound calls to the sub-component registered for their call type.

use std::collections::HashMap;

use pithos_core::{CallType, Component, InboundCall};
use pithos_services::{Components, Outbox};

use crate::error::RouteError;

/// Result of dispatching one inbound call.
#[derive(Debug)]
pub enum Dispatched {
    /// Consumed by the named sub-component.
    Handled(Component),
    /// Mapped to the communicator itself; the caller answers it.
    Local(InboundCall),
    /// No handler is registered, or the handler declined the call.
    /// Ownership returns to the caller.
    Unhandled(InboundCall),
}

/// Maps call types to the sub-component that answers them.
pub struct CallDispatcher {
    handlers: HashMap<CallType, Component>,
}

impl Default for CallDispatcher {
    fn default() -> Self {
        let mut d = Self::new();
        d.register(CallType::Ping, Component::Communicator);
        d.register(CallType::ObjectPut, Component::PeerLogic);
        d.register(CallType::ObjectGet, Component::PeerLogic);
        d
    }
}

impl CallDispatcher {
    /// An empty table. Use `default()` for the standard mapping.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register (or replace) the handler for a call type.
    pub fn register(&mut self, call_type: CallType, component: Component) {
        self.handlers.insert(call_type, component);
    }

    pub fn handler(&self, call_type: CallType) -> Option<Component> {
        self.handlers.get(&call_type).copied()
    }

    /// Hand `call` to exactly one handler, or give it back.
    ///
    /// A call mapped to a sub-component this node does not run is a
    /// configuration error and fails with `MissingSubComponent`.
    pub fn dispatch(
        &self,
        call: InboundCall,
        components: &mut Components,
        outbox: &mut Outbox,
    ) -> Result<Dispatched, RouteError> {
        let call_type = call.call_type();
        let Some(component) = self.handler(call_type) else {
            tracing::debug!(call_id = %call.call_id, ?call_type, "no handler registered");
            return Ok(Dispatched::Unhandled(call));
        };
        Self::deliver_to(component, call, components, outbox)
    }

    /// Hand `call` straight to `component`, bypassing the table.
    pub fn deliver_to(
        component: Component,
        call: InboundCall,
        components: &mut Components,
        outbox: &mut Outbox,
    ) -> Result<Dispatched, RouteError> {
        let call_type = call.call_type();
        let missing = || RouteError::MissingSubComponent(component);
        let result = match component {
            Component::Communicator => return Ok(Dispatched::Local(call)),
            Component::PeerLogic => components
                .peer_logic
                .as_mut()
                .ok_or_else(missing)?
                .handle_call(call, outbox),
            Component::GroupStorage => components
                .group_storage
                .as_mut()
                .ok_or_else(missing)?
                .handle_call(call, outbox),
            Component::SuperPeer => components
                .super_peer
                .as_mut()
                .ok_or_else(missing)?
                .handle_call(call, outbox),
            Component::DhtStorage => components
                .dht_storage
                .as_mut()
                .ok_or_else(missing)?
                .handle_call(call, outbox),
            Component::Application => Err(call),
        };

        match result {
            Ok(()) => Ok(Dispatched::Handled(component)),
            Err(call) => {
                tracing::debug!(call_id = %call.call_id, ?call_type, ?component, "handler declined call");
                Ok(Dispatched::Unhandled(call))
            }
        }
    }
}
