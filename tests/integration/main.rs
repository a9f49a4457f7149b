//! Pithos integration test harness.
//!
//! Nodes here run against recording doubles: every transport send,
//! overlay route and sub-component hand-off is captured so tests can
//! assert that a unit went to exactly one place.
//!
//!   cargo test --test integration

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;

use pithos_core::config::PithosConfig;
use pithos_core::wire::{self, Frame};
use pithos_core::{CallId, CallTarget, OverlayKey, ResponsePayload, TransportAddress, Unit};
use pithos_services::{
    Application, CallContext, Components, DhtStorage, GroupStorage, Outbox, Overlay, PeerLogic,
    Port, ReadyFlag, RpcListener, SuperPeer, Transport,
};
use pithosd::Communicator;

mod end_to_end;
mod rpc;
mod sender;

// ── Harness ───────────────────────────────────────────────────────────────────

pub type Log<T> = Arc<Mutex<Vec<T>>>;

pub fn take<T>(log: &Log<T>) -> Vec<T> {
    std::mem::take(&mut *log.lock().unwrap())
}

pub fn count<T>(log: &Log<T>) -> usize {
    log.lock().unwrap().len()
}

pub fn addr(last: u8) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, last], 2000))
}

pub fn taddr(last: u8) -> TransportAddress {
    TransportAddress::new(addr(last))
}

/// Captures every datagram handed to the transport.
#[derive(Clone, Default)]
pub struct RecordingTransport(pub Log<(SocketAddr, Bytes)>);

impl RecordingTransport {
    /// Decode everything sent so far, draining the log.
    pub fn frames(&self) -> Vec<(SocketAddr, Frame)> {
        take(&self.0)
            .into_iter()
            .map(|(dest, datagram)| {
                let frame = wire::decode(TransportAddress::new(dest), &datagram).unwrap();
                (dest, frame)
            })
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn send_to(&mut self, destination: SocketAddr, datagram: Bytes) -> Result<()> {
        self.0.lock().unwrap().push((destination, datagram));
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingOverlay(pub Log<(OverlayKey, Unit)>);

impl Overlay for RecordingOverlay {
    fn route(&mut self, key: OverlayKey, unit: Unit) -> Result<()> {
        self.0.lock().unwrap().push((key, unit));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PingOutcome {
    Answered(CallId),
    TimedOut(CallId),
}

#[derive(Clone, Default)]
pub struct RecordingGroupStorage {
    pub units: Log<Unit>,
    pub pings: Log<PingOutcome>,
}

impl GroupStorage for RecordingGroupStorage {
    fn handle_unit(&mut self, unit: Unit, _outbox: &mut Outbox) -> Result<()> {
        self.units.lock().unwrap().push(unit);
        Ok(())
    }

    fn ping_response(&mut self, call_id: CallId, _: Option<CallContext>, _: Duration, _: &mut Outbox) {
        self.pings.lock().unwrap().push(PingOutcome::Answered(call_id));
    }

    fn ping_timeout(&mut self, call_id: CallId, _: CallTarget, _: Option<CallContext>, _: &mut Outbox) {
        self.pings.lock().unwrap().push(PingOutcome::TimedOut(call_id));
    }
}

#[derive(Clone, Default)]
pub struct RecordingSuperPeer {
    pub group: Log<Unit>,
    pub overlay: Log<(OverlayKey, Unit)>,
}

impl SuperPeer for RecordingSuperPeer {
    fn handle_group_unit(&mut self, unit: Unit, _outbox: &mut Outbox) -> Result<()> {
        self.group.lock().unwrap().push(unit);
        Ok(())
    }

    fn handle_overlay_unit(&mut self, key: OverlayKey, unit: Unit, _outbox: &mut Outbox) -> Result<()> {
        self.overlay.lock().unwrap().push((key, unit));
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingDht {
    pub responses: Log<(CallId, ResponsePayload)>,
    pub timeouts: Log<CallId>,
}

impl DhtStorage for RecordingDht {
    fn handle_response(
        &mut self,
        call_id: CallId,
        response: ResponsePayload,
        _: Option<CallContext>,
        _: Duration,
        _: &mut Outbox,
    ) {
        self.responses.lock().unwrap().push((call_id, response));
    }

    fn handle_timeout(&mut self, call_id: CallId, _: CallTarget, _: Option<CallContext>, _: &mut Outbox) {
        self.timeouts.lock().unwrap().push(call_id);
    }
}

#[derive(Clone, Default)]
pub struct RecordingApplication(pub Log<Unit>);

impl Application for RecordingApplication {
    fn deliver(&mut self, unit: Unit) -> Result<()> {
        self.0.lock().unwrap().push(unit);
        Ok(())
    }
}

/// Peer logic that passes application units to the group untouched and
/// records nothing else.
pub struct PassThroughPeer;

impl PeerLogic for PassThroughPeer {
    fn handle_unit(&mut self, unit: Unit, outbox: &mut Outbox) -> Result<()> {
        outbox.send(Port::PeerGroup, unit);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    Response(CallId, ResponsePayload, Option<CallContext>),
    Timeout(CallId, CallTarget),
}

#[derive(Clone, Default)]
pub struct RecordingListener(pub Log<CallEvent>);

impl RpcListener for RecordingListener {
    fn on_response(
        &mut self,
        call_id: CallId,
        response: ResponsePayload,
        context: Option<CallContext>,
        _rtt: Duration,
    ) {
        self.0
            .lock()
            .unwrap()
            .push(CallEvent::Response(call_id, response, context));
    }

    fn on_timeout(&mut self, call_id: CallId, target: CallTarget, _context: Option<CallContext>) {
        self.0.lock().unwrap().push(CallEvent::Timeout(call_id, target));
    }
}

/// A communicator wired to recording collaborators.
pub struct TestNode {
    pub node: Communicator,
    pub transport: RecordingTransport,
    pub overlay: RecordingOverlay,
    pub ready: ReadyFlag,
}

impl TestNode {
    pub fn new(components: Components) -> Self {
        Self::with_config(components, &PithosConfig::default())
    }

    pub fn with_config(components: Components, config: &PithosConfig) -> Self {
        let transport = RecordingTransport::default();
        let overlay = RecordingOverlay::default();
        let ready = ReadyFlag::new(true);
        let node = Communicator::new(
            taddr(1),
            components,
            Box::new(transport.clone()),
            Box::new(overlay.clone()),
            Arc::new(ready.clone()),
            config,
        );
        Self {
            node,
            transport,
            overlay,
            ready,
        }
    }

    /// Encode `unit` as it would arrive from `from` and feed it in.
    pub fn receive(
        &mut self,
        from: SocketAddr,
        unit: Unit,
    ) -> std::result::Result<pithosd::Received, pithosd::RouteError> {
        let datagram = wire::encode(&Frame::Packet(unit)).unwrap();
        self.node
            .handle_datagram(from, &datagram, std::time::Instant::now())
    }
}
