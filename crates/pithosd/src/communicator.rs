//! Communicator: the single gateway of a node.
//!
//! Every unit, call and response entering or leaving the node passes
//! through here. Classification is a pure function of the arrival port and
//! the unit's payload type:
//!
//! | arrival                       | destination                           |
//! |-------------------------------|---------------------------------------|
//! | application                   | peer logic                            |
//! | peer logic, upward            | application                           |
//! | transport, group-storage type | group storage                         |
//! | transport, super-peer type    | super peer (dropped on plain peers)   |
//! | overlay deliver               | super peer (dropped on plain peers)   |
//! | super peer / peer group       | overlay if overlay-store, else sender |
//! | group storage                 | sender                                |
//!
//! A unit is moved into exactly one destination or dropped with a reason.
//! Anything the sub-components emit while handling it is queued and applied
//! by `pump()`, in order, after the current event.

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pithos_core::config::{PithosConfig, RpcConfig, StatsConfig};
use pithos_core::rpc::{CallFrame, ResponseFrame};
use pithos_core::wire::{self, Frame};
use pithos_core::{
    derive_key, CallId, CallOrigin, CallPayload, CallTarget, CallType, Component, InboundCall,
    OverlayKey, ResponsePayload, TransportAddress, Unit,
};
use pithos_services::{
    Bootstrap, CallContext, CallRequest, Components, Emission, MetricsSink, NodeRole, Outbox,
    Overlay, PendingCall, Port, RpcListener, RpcTable, TimeoutEvent, TrafficSnapshot, Transmission,
    Transport,
};

use crate::dispatch::{CallDispatcher, Dispatched};
use crate::error::RouteError;
use crate::sender::TransportSender;

pub const SENT_PACKETS_RATE: &str = "Pithos: Sent packets/s";
pub const RECEIVED_PACKETS_RATE: &str = "Pithos: Received packets/s";
pub const SENT_BYTES_RATE: &str = "Pithos: Sent UDP Bytes/s";
pub const RECEIVED_BYTES_RATE: &str = "Pithos: Received UDP Bytes/s";

/// Where a routed unit ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Application,
    PeerLogic,
    GroupStorage,
    SuperPeerGroup,
    SuperPeerOverlay,
    Transport,
    Overlay(OverlayKey),
}

/// Why a unit was discarded without reaching a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Super-peer traffic reached a node without a super peer.
    NotSuperPeer,
    /// Overlay delivery at a node that has nobody to hand it to.
    UnroutablePayload,
    /// Upward delivery at a node without an application tier.
    NoApplication,
    /// Overlay-store request without an attached object.
    NoObject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Forwarded(Destination),
    Dropped(DropReason),
}

/// Result of handing an inbound call to the node.
#[derive(Debug)]
pub enum CallOutcome {
    Handled(Component),
    /// Answered by the communicator itself.
    Answered,
    /// Nobody took the call; ownership is back with the caller.
    Unhandled(InboundCall),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    Delivered,
    /// No pending call with this id: expired, cancelled or duplicate.
    Unmatched,
}

/// What a received datagram turned into.
#[derive(Debug)]
pub enum Received {
    Unit(Disposition),
    Call(CallOutcome),
    Response(ResponseOutcome),
}

/// Who hears about the outcome of a call.
pub enum Listener {
    /// Role delegation: ping outcomes go to group storage, everything else
    /// to DHT storage.
    Default,
    Custom(Box<dyn RpcListener>),
}

impl Listener {
    pub fn custom(listener: impl RpcListener + 'static) -> Self {
        Listener::Custom(Box::new(listener))
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Listener::Default => f.write_str("Default"),
            Listener::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Per-call overrides; unset fields fall back to the node's RPC config.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub context: Option<CallContext>,
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
}

impl CallOptions {
    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }
}

enum Work {
    Emission(Emission),
    Call { call: InboundCall, to: Component },
}

pub struct Communicator {
    address: TransportAddress,
    components: Components,
    outbox: Outbox,
    work: VecDeque<Work>,
    sender: TransportSender,
    overlay: Box<dyn Overlay>,
    calls: RpcTable<Listener>,
    dispatcher: CallDispatcher,
    rpc: RpcConfig,
    stats: StatsConfig,
    created_at: Instant,
}

impl Communicator {
    pub fn new(
        address: TransportAddress,
        components: Components,
        transport: Box<dyn Transport>,
        overlay: Box<dyn Overlay>,
        bootstrap: Arc<dyn Bootstrap>,
        config: &PithosConfig,
    ) -> Self {
        tracing::info!(%address, role = ?components.role(), ?components, "communicator created");
        Self {
            address,
            components,
            outbox: Outbox::new(),
            work: VecDeque::new(),
            sender: TransportSender::new(transport, bootstrap),
            overlay,
            calls: RpcTable::new(),
            dispatcher: CallDispatcher::default(),
            rpc: config.rpc.clone(),
            stats: config.stats.clone(),
            created_at: Instant::now(),
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: CallDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn address(&self) -> TransportAddress {
        self.address
    }

    pub fn role(&self) -> NodeRole {
        self.components.role()
    }

    pub fn creation_time(&self) -> Instant {
        self.created_at
    }

    // ── Units ────────────────────────────────────────────────────────────────

    /// Route a unit that arrived on `port`.
    pub fn route(&mut self, port: Port, unit: Unit) -> Result<Disposition, RouteError> {
        match port {
            Port::Application => {
                let peer = self
                    .components
                    .peer_logic
                    .as_mut()
                    .ok_or(RouteError::MissingSubComponent(Component::PeerLogic))?;
                if let Err(e) = peer.handle_unit(unit, &mut self.outbox) {
                    tracing::warn!(error = %e, "peer logic failed to handle unit");
                }
                Ok(Disposition::Forwarded(Destination::PeerLogic))
            }
            Port::PeerUpward => match self.components.application.as_mut() {
                Some(app) => {
                    if let Err(e) = app.deliver(unit) {
                        tracing::warn!(error = %e, "application failed to take unit");
                    }
                    Ok(Disposition::Forwarded(Destination::Application))
                }
                None => {
                    tracing::debug!(payload_type = ?unit.payload_type, "no application tier, dropping upward unit");
                    Ok(Disposition::Dropped(DropReason::NoApplication))
                }
            },
            Port::TransportIn => self.receive(unit),
            Port::SuperPeer | Port::PeerGroup if unit.is_overlay_store() => self.overlay_store(unit),
            Port::SuperPeer | Port::PeerGroup | Port::GroupStorage => {
                self.sender.send(unit)?;
                Ok(Disposition::Forwarded(Destination::Transport))
            }
        }
    }

    /// A unit the overlay delivered to this node under `key`.
    pub fn deliver(&mut self, key: OverlayKey, unit: Unit) -> Disposition {
        match self.components.super_peer.as_mut() {
            Some(sp) => {
                if let Err(e) = sp.handle_overlay_unit(key, unit, &mut self.outbox) {
                    tracing::warn!(%key, error = %e, "super peer failed to handle overlay unit");
                }
                Disposition::Forwarded(Destination::SuperPeerOverlay)
            }
            None => {
                tracing::debug!(%key, payload_type = ?unit.payload_type, "discarding overlay delivery");
                Disposition::Dropped(DropReason::UnroutablePayload)
            }
        }
    }

    /// Decode and handle one datagram received from `source`.
    pub fn handle_datagram(
        &mut self,
        source: SocketAddr,
        datagram: &[u8],
        now: Instant,
    ) -> Result<Received, RouteError> {
        let source = TransportAddress::new(source);
        match wire::decode(source, datagram)? {
            Frame::Packet(unit) => self.route(Port::TransportIn, unit).map(Received::Unit),
            Frame::Call(CallFrame { call_id, payload }) => {
                let call = InboundCall {
                    call_id,
                    origin: CallOrigin::External(source),
                    payload,
                };
                match self.handle_call(call)? {
                    CallOutcome::Unhandled(call) => {
                        self.reject(call, now)?;
                        Ok(Received::Call(CallOutcome::Answered))
                    }
                    outcome => Ok(Received::Call(outcome)),
                }
            }
            Frame::Response(ResponseFrame { call_id, payload }) => {
                if self.calls.target(call_id) != Some(CallTarget::External(source)) {
                    tracing::warn!(call_id = %call_id, %source, "response matches no call sent to its source, ignoring");
                    return Ok(Received::Response(ResponseOutcome::Unmatched));
                }
                self.handle_response(call_id, payload, now)
                    .map(Received::Response)
            }
        }
    }

    fn receive(&mut self, unit: Unit) -> Result<Disposition, RouteError> {
        self.sender.counters_mut().record_received(unit.byte_length);
        let payload_type = unit.payload_type;

        if payload_type.is_group_storage() {
            let gs = self
                .components
                .group_storage
                .as_mut()
                .ok_or(RouteError::MissingSubComponent(Component::GroupStorage))?;
            if let Err(e) = gs.handle_unit(unit, &mut self.outbox) {
                tracing::warn!(?payload_type, error = %e, "group storage failed to handle unit");
            }
            Ok(Disposition::Forwarded(Destination::GroupStorage))
        } else if payload_type.is_super_peer() {
            match self.components.super_peer.as_mut() {
                Some(sp) => {
                    if let Err(e) = sp.handle_group_unit(unit, &mut self.outbox) {
                        tracing::warn!(?payload_type, error = %e, "super peer failed to handle unit");
                    }
                    Ok(Disposition::Forwarded(Destination::SuperPeerGroup))
                }
                None => {
                    tracing::warn!(
                        ?payload_type,
                        node = %self.address,
                        "super peer unit received but this node is not a super peer, ignoring"
                    );
                    Ok(Disposition::Dropped(DropReason::NotSuperPeer))
                }
            }
        } else {
            Err(RouteError::UnknownMessageType(payload_type.into()))
        }
    }

    fn overlay_store(&mut self, unit: Unit) -> Result<Disposition, RouteError> {
        if !self.sender.is_ready() {
            return Err(RouteError::UnderlayNotReady);
        }
        let Some(object) = unit.object.as_ref() else {
            tracing::warn!(payload_type = ?unit.payload_type, "overlay store without an object, dropping");
            return Ok(Disposition::Dropped(DropReason::NoObject));
        };

        let key = derive_key(object.name());
        tracing::debug!(name = object.name(), %key, "storing object via overlay");
        self.overlay.route(key, unit).map_err(RouteError::Overlay)?;
        Ok(Disposition::Forwarded(Destination::Overlay(key)))
    }

    // ── Calls ────────────────────────────────────────────────────────────────

    /// Register a call and send its first transmission.
    pub fn issue_call(
        &mut self,
        target: CallTarget,
        payload: CallPayload,
        options: CallOptions,
        listener: Listener,
        now: Instant,
    ) -> Result<CallId, RouteError> {
        let request = CallRequest {
            target,
            payload,
            context: options.context,
            timeout: options.timeout.unwrap_or_else(|| self.rpc.default_timeout()),
            retries: options.retries.unwrap_or(self.rpc.retries),
            listener,
        };
        let transmission = self.calls.issue(request, now);
        let call_id = transmission.call_id;
        if let Err(e) = self.transmit(transmission) {
            self.calls.cancel(call_id);
            return Err(e);
        }
        Ok(call_id)
    }

    /// Call a sub-component of this node on behalf of another component.
    pub fn issue_internal_call(
        &mut self,
        component: Component,
        payload: CallPayload,
        options: CallOptions,
        listener: Listener,
        now: Instant,
    ) -> Result<CallId, RouteError> {
        self.issue_call(CallTarget::Internal(component), payload, options, listener, now)
    }

    pub fn issue_external_call(
        &mut self,
        destination: TransportAddress,
        payload: CallPayload,
        options: CallOptions,
        listener: Listener,
        now: Instant,
    ) -> Result<CallId, RouteError> {
        self.issue_call(CallTarget::External(destination), payload, options, listener, now)
    }

    pub fn ping_node(
        &mut self,
        destination: TransportAddress,
        options: CallOptions,
        listener: Listener,
        now: Instant,
    ) -> Result<CallId, RouteError> {
        self.issue_external_call(destination, CallPayload::Ping, options, listener, now)
    }

    /// Drop a pending call without notifying its listener.
    pub fn cancel_call(&mut self, call_id: CallId) -> bool {
        self.calls.cancel(call_id).is_some()
    }

    pub fn is_pending(&self, call_id: CallId) -> bool {
        self.calls.is_pending(call_id)
    }

    pub fn pending_calls(&self) -> usize {
        self.calls.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.calls.next_deadline()
    }

    /// Hand an inbound call to its registered handler.
    pub fn handle_call(&mut self, call: InboundCall) -> Result<CallOutcome, RouteError> {
        if !self.sender.is_ready() {
            tracing::error!(call_id = %call.call_id, "call received while underlay is still bootstrapping");
            return Err(RouteError::UnderlayNotReady);
        }
        let dispatched = self
            .dispatcher
            .dispatch(call, &mut self.components, &mut self.outbox)?;
        self.settle(dispatched)
    }

    fn settle(&mut self, dispatched: Dispatched) -> Result<CallOutcome, RouteError> {
        match dispatched {
            Dispatched::Handled(component) => Ok(CallOutcome::Handled(component)),
            Dispatched::Local(call) => self.answer(call),
            Dispatched::Unhandled(call) => {
                tracing::warn!(call_id = %call.call_id, call_type = ?call.call_type(), "call not handled");
                Ok(CallOutcome::Unhandled(call))
            }
        }
    }

    /// Calls the communicator answers itself.
    fn answer(&mut self, call: InboundCall) -> Result<CallOutcome, RouteError> {
        match call.payload {
            CallPayload::Ping => {
                self.outbox.respond(call.origin, call.call_id, ResponsePayload::Pong);
                Ok(CallOutcome::Answered)
            }
            _ => Ok(CallOutcome::Unhandled(call)),
        }
    }

    /// Explicitly discard an unhandled call by failing it back to its caller.
    fn reject(&mut self, call: InboundCall, now: Instant) -> Result<(), RouteError> {
        let reason = format!("no handler for {:?}", call.call_type());
        self.send_rpc_response(call.origin, call.call_id, ResponsePayload::Failed { reason }, now)
            .map(|_| ())
    }

    /// Answer a call on behalf of an in-node component.
    pub fn send_rpc_response(
        &mut self,
        origin: CallOrigin,
        call_id: CallId,
        response: ResponsePayload,
        now: Instant,
    ) -> Result<ResponseOutcome, RouteError> {
        match origin {
            CallOrigin::Internal => self.handle_response(call_id, response, now),
            CallOrigin::External(destination) => {
                let frame = Frame::Response(ResponseFrame {
                    call_id,
                    payload: response,
                });
                self.sender.send_frame(destination, &frame)?;
                Ok(ResponseOutcome::Delivered)
            }
        }
    }

    /// Match a response to its pending call and notify the listener.
    pub fn handle_response(
        &mut self,
        call_id: CallId,
        response: ResponsePayload,
        now: Instant,
    ) -> Result<ResponseOutcome, RouteError> {
        let Some(done) = self.calls.complete(call_id, now) else {
            return Ok(ResponseOutcome::Unmatched);
        };
        let PendingCall {
            payload,
            context,
            listener,
            ..
        } = done.call;

        match listener {
            Listener::Custom(mut listener) => {
                listener.on_response(call_id, response, context, done.rtt);
            }
            Listener::Default if payload.call_type() == CallType::Ping => {
                self.components
                    .group_storage
                    .as_mut()
                    .ok_or(RouteError::MissingSubComponent(Component::GroupStorage))?
                    .ping_response(call_id, context, done.rtt, &mut self.outbox);
            }
            Listener::Default => {
                self.components
                    .dht_storage
                    .as_mut()
                    .ok_or(RouteError::MissingSubComponent(Component::DhtStorage))?
                    .handle_response(call_id, response, context, done.rtt, &mut self.outbox);
            }
        }
        Ok(ResponseOutcome::Delivered)
    }

    /// Retry or expire every call whose deadline has passed.
    pub fn poll_timeouts(&mut self, now: Instant) -> Result<(), RouteError> {
        for event in self.calls.poll_timeouts(now) {
            match event {
                TimeoutEvent::Retry(transmission) => self.transmit(transmission)?,
                TimeoutEvent::Expired(call) => self.expire(call)?,
            }
        }
        Ok(())
    }

    fn expire(&mut self, call: PendingCall<Listener>) -> Result<(), RouteError> {
        let PendingCall {
            call_id,
            target,
            payload,
            context,
            listener,
            ..
        } = call;

        match listener {
            Listener::Custom(mut listener) => listener.on_timeout(call_id, target, context),
            Listener::Default if payload.call_type() == CallType::Ping => {
                self.components
                    .group_storage
                    .as_mut()
                    .ok_or(RouteError::MissingSubComponent(Component::GroupStorage))?
                    .ping_timeout(call_id, target, context, &mut self.outbox);
            }
            Listener::Default => {
                self.components
                    .dht_storage
                    .as_mut()
                    .ok_or(RouteError::MissingSubComponent(Component::DhtStorage))?
                    .handle_timeout(call_id, target, context, &mut self.outbox);
            }
        }
        Ok(())
    }

    fn transmit(&mut self, transmission: Transmission) -> Result<(), RouteError> {
        let Transmission {
            call_id,
            target,
            payload,
            ..
        } = transmission;

        match target {
            CallTarget::Internal(to) => {
                let call = InboundCall {
                    call_id,
                    origin: CallOrigin::Internal,
                    payload,
                };
                self.work.push_back(Work::Call { call, to });
                Ok(())
            }
            CallTarget::External(destination) => {
                let frame = Frame::Call(CallFrame { call_id, payload });
                self.sender.send_frame(destination, &frame)?;
                Ok(())
            }
        }
    }

    // ── Deferred work ────────────────────────────────────────────────────────

    /// Apply everything queued by earlier events, oldest first, until the
    /// queue is empty. Non-fatal errors drop the offending item and are
    /// logged; the first fatal error stops the pump and is returned.
    pub fn pump(&mut self, now: Instant) -> Result<usize, RouteError> {
        let mut applied = 0;
        loop {
            while let Some(emission) = self.outbox.pop() {
                self.work.push_back(Work::Emission(emission));
            }
            let Some(work) = self.work.pop_front() else {
                return Ok(applied);
            };
            applied += 1;
            if let Err(e) = self.apply(work, now) {
                if e.is_fatal() {
                    return Err(e);
                }
                tracing::warn!(error = %e, "dropping queued work");
            }
        }
    }

    pub fn has_queued_work(&self) -> bool {
        !self.outbox.is_empty() || !self.work.is_empty()
    }

    fn apply(&mut self, work: Work, now: Instant) -> Result<(), RouteError> {
        match work {
            Work::Emission(Emission::Unit { port, unit }) => {
                let disposition = self.route(port, unit)?;
                tracing::trace!(?port, ?disposition, "emitted unit routed");
            }
            Work::Emission(Emission::Call {
                target,
                payload,
                context,
            }) => {
                let options = CallOptions {
                    context,
                    ..CallOptions::default()
                };
                self.issue_call(target, payload, options, Listener::Default, now)?;
            }
            Work::Emission(Emission::Response {
                origin,
                call_id,
                response,
            }) => {
                self.send_rpc_response(origin, call_id, response, now)?;
            }
            Work::Call { call, to } => {
                let outcome = if to == Component::Communicator {
                    self.handle_call(call)?
                } else {
                    if !self.sender.is_ready() {
                        return Err(RouteError::UnderlayNotReady);
                    }
                    let dispatched =
                        CallDispatcher::deliver_to(to, call, &mut self.components, &mut self.outbox)?;
                    self.settle(dispatched)?
                };
                if let CallOutcome::Unhandled(call) = outcome {
                    self.reject(call, now)?;
                }
            }
        }
        Ok(())
    }

    // ── Statistics ───────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> TrafficSnapshot {
        self.sender.counters().snapshot()
    }

    /// Zero the traffic counters, returning what they held.
    pub fn reset_counters(&mut self) -> TrafficSnapshot {
        self.sender.counters_mut().reset()
    }

    /// Publish per-second traffic rates, if the node lived long enough to
    /// give meaningful numbers. Returns whether anything was published.
    pub fn finish(&self, now: Instant, metrics: &dyn MetricsSink) -> bool {
        let lifetime = now.saturating_duration_since(self.created_at);
        if lifetime < self.stats.min_measured() || lifetime.is_zero() {
            tracing::debug!(
                lifetime_ms = lifetime.as_millis() as u64,
                "lifetime too short, not publishing rates"
            );
            return false;
        }

        let secs = lifetime.as_secs_f64();
        let snap = self.snapshot();
        metrics.observe(SENT_PACKETS_RATE, snap.packets_sent as f64 / secs);
        metrics.observe(RECEIVED_PACKETS_RATE, snap.packets_received as f64 / secs);
        metrics.observe(SENT_BYTES_RATE, snap.bytes_sent as f64 / secs);
        metrics.observe(RECEIVED_BYTES_RATE, snap.bytes_received as f64 / secs);
        tracing::info!(
            node = %self.address,
            lifetime_secs = secs,
            packets_sent = snap.packets_sent,
            packets_received = snap.packets_received,
            "traffic rates published"
        );
        true
    }
}
