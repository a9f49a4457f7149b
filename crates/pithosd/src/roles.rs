//! Default role sub-components run by the daemon.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use pithos_core::config::RolesConfig;
use pithos_core::{
    CallId, CallPayload, CallTarget, InboundCall, OverlayKey, PayloadType, ResponsePayload,
    StoredObject, Unit,
};
use pithos_services::{
    Application, CallContext, Components, DhtStorage, GroupStorage, MetricsSink, Outbox,
    PeerLogic, Port, StorageQueue, SuperPeer,
};

/// Peer logic that pushes application units to the group and keeps the
/// objects stored through put calls.
pub struct StoringPeer {
    store: StorageQueue,
}

impl StoringPeer {
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            store: StorageQueue::new(metrics),
        }
    }
}

impl PeerLogic for StoringPeer {
    fn handle_unit(&mut self, unit: Unit, outbox: &mut Outbox) -> Result<()> {
        if !unit.is_overlay_store() && unit.destination.is_unspecified() {
            bail!("application unit {:?} has no destination", unit.payload_type);
        }
        outbox.send(Port::PeerGroup, unit);
        Ok(())
    }

    fn handle_call(&mut self, call: InboundCall, outbox: &mut Outbox) -> Result<(), InboundCall> {
        let response = match call.payload {
            CallPayload::ObjectPut { object } => {
                let name = object.name().to_string();
                self.store.push(object);
                ResponsePayload::ObjectStored { name }
            }
            CallPayload::ObjectGet { ref name } => ResponsePayload::ObjectFound {
                object: self.store.find(name).cloned(),
            },
            CallPayload::Ping => return Err(call),
        };
        outbox.respond(call.origin, call.call_id, response);
        Ok(())
    }
}

/// Group storage holding written and replicated objects.
pub struct GroupStore {
    store: StorageQueue,
}

impl GroupStore {
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            store: StorageQueue::new(metrics),
        }
    }

    fn keep(&mut self, unit: Unit) -> Result<()> {
        match unit.object {
            Some(object) => {
                self.store.push(object);
                Ok(())
            }
            None => bail!("{:?} unit without an object", unit.payload_type),
        }
    }
}

impl GroupStorage for GroupStore {
    fn handle_unit(&mut self, unit: Unit, outbox: &mut Outbox) -> Result<()> {
        match unit.payload_type {
            PayloadType::Write | PayloadType::Replicate | PayloadType::ObjectAdd => self.keep(unit),
            PayloadType::RetrieveReq => {
                let Some(wanted) = unit.object.as_ref() else {
                    bail!("retrieve request without an object name");
                };
                match self.store.find(wanted.name()) {
                    Some(found) => {
                        let byte_length = u32::try_from(found.size()).unwrap_or(u32::MAX);
                        let reply = Unit::new(PayloadType::Response, unit.source, byte_length)
                            .with_object(found.clone());
                        outbox.send(Port::GroupStorage, reply);
                    }
                    None => tracing::debug!(name = wanted.name(), "retrieve request for unknown object"),
                }
                Ok(())
            }
            other => {
                tracing::debug!(payload_type = ?other, source = %unit.source, "group unit noted");
                Ok(())
            }
        }
    }

    fn ping_response(
        &mut self,
        call_id: CallId,
        _context: Option<CallContext>,
        rtt: Duration,
        _outbox: &mut Outbox,
    ) {
        tracing::debug!(call_id = %call_id, rtt_ms = rtt.as_millis() as u64, "group member alive");
    }

    fn ping_timeout(
        &mut self,
        call_id: CallId,
        target: CallTarget,
        _context: Option<CallContext>,
        _outbox: &mut Outbox,
    ) {
        tracing::info!(call_id = %call_id, ?target, "group member did not answer ping");
    }
}

/// Super peer that admits joining peers and pushes group objects into
/// the overlay.
pub struct Coordinator {
    store: StorageQueue,
}

impl Coordinator {
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            store: StorageQueue::new(metrics),
        }
    }
}

impl SuperPeer for Coordinator {
    fn handle_group_unit(&mut self, unit: Unit, outbox: &mut Outbox) -> Result<()> {
        match unit.payload_type {
            PayloadType::JoinReq => {
                tracing::info!(peer = %unit.source, "admitting peer to group");
                outbox.send(Port::SuperPeer, Unit::new(PayloadType::JoinAccept, unit.source, 0));
            }
            PayloadType::SpObjectAdd | PayloadType::OverlayWriteReq => match unit.object {
                Some(object) => outbox.send(Port::SuperPeer, Unit::overlay_store(object)),
                None => bail!("{:?} unit without an object", unit.payload_type),
            },
            other => tracing::debug!(payload_type = ?other, source = %unit.source, "group event noted"),
        }
        Ok(())
    }

    fn handle_overlay_unit(&mut self, key: OverlayKey, unit: Unit, _outbox: &mut Outbox) -> Result<()> {
        let Some(object) = unit.object else {
            bail!("overlay delivery under {key} without an object");
        };
        tracing::debug!(%key, name = object.name(), "object stored for overlay key");
        self.store.push(object);
        Ok(())
    }
}

/// Logs outcomes of calls issued without a dedicated listener.
pub struct ResponseLog;

impl DhtStorage for ResponseLog {
    fn handle_response(
        &mut self,
        call_id: CallId,
        response: ResponsePayload,
        _context: Option<CallContext>,
        rtt: Duration,
        _outbox: &mut Outbox,
    ) {
        tracing::debug!(call_id = %call_id, ?response, rtt_ms = rtt.as_millis() as u64, "call answered");
    }

    fn handle_timeout(
        &mut self,
        call_id: CallId,
        target: CallTarget,
        _context: Option<CallContext>,
        _outbox: &mut Outbox,
    ) {
        tracing::info!(call_id = %call_id, ?target, "call expired");
    }
}

/// Application tier that only records what reaches it.
pub struct LoggingApplication;

impl Application for LoggingApplication {
    fn deliver(&mut self, unit: Unit) -> Result<()> {
        tracing::info!(
            payload_type = ?unit.payload_type,
            object = unit.object.as_ref().map(StoredObject::name),
            "unit delivered to application"
        );
        Ok(())
    }
}

/// Assemble the sub-components enabled in `roles`.
pub fn build(roles: &RolesConfig, metrics: Arc<dyn MetricsSink>) -> Components {
    let mut components = Components::new()
        .with_application(LoggingApplication)
        .with_dht_storage(ResponseLog);
    if roles.peer_logic {
        components = components.with_peer_logic(StoringPeer::new(metrics.clone()));
    }
    if roles.group_storage {
        components = components.with_group_storage(GroupStore::new(metrics.clone()));
    }
    if roles.super_peer {
        components = components.with_super_peer(Coordinator::new(metrics));
    }
    components
}
