//! Transport sender: the only path from a node onto the network.
//!
//! Every datagram goes through the same two checks: the underlay must have
//! finished bootstrapping, and the destination must be specified. A unit
//! that fails either check is dropped together with the error; it is never
//! transmitted later.

use std::net::SocketAddr;
use std::sync::Arc;

use pithos_core::wire::{self, Frame};
use pithos_core::{TransportAddress, Unit};
use pithos_services::{Bootstrap, TrafficCounters, Transport};

use crate::error::SendError;

pub struct TransportSender {
    transport: Box<dyn Transport>,
    bootstrap: Arc<dyn Bootstrap>,
    counters: TrafficCounters,
}

impl TransportSender {
    pub fn new(transport: Box<dyn Transport>, bootstrap: Arc<dyn Bootstrap>) -> Self {
        Self {
            transport,
            bootstrap,
            counters: TrafficCounters::new(),
        }
    }

    /// Emit a unit to its destination and count it.
    pub fn send(&mut self, unit: Unit) -> Result<(), SendError> {
        let destination = self.check(unit.destination)?;
        let byte_length = unit.byte_length;
        let payload_type = unit.payload_type;

        let datagram = wire::encode(&Frame::Packet(unit))?;
        self.transport
            .send_to(destination, datagram)
            .map_err(SendError::Transport)?;

        self.counters.record_sent(byte_length);
        tracing::trace!(%destination, ?payload_type, byte_length, "unit sent");
        Ok(())
    }

    /// Emit an RPC frame. Calls and responses are not counted as units.
    pub fn send_frame(&mut self, destination: TransportAddress, frame: &Frame) -> Result<(), SendError> {
        let destination = self.check(destination)?;
        let datagram = wire::encode(frame)?;
        self.transport
            .send_to(destination, datagram)
            .map_err(SendError::Transport)
    }

    pub fn is_ready(&self) -> bool {
        self.bootstrap.is_ready()
    }

    pub fn counters(&self) -> &TrafficCounters {
        &self.counters
    }

    pub fn counters_mut(&mut self) -> &mut TrafficCounters {
        &mut self.counters
    }

    fn check(&self, destination: TransportAddress) -> Result<SocketAddr, SendError> {
        if !self.bootstrap.is_ready() {
            tracing::error!(%destination, "underlay still bootstrapping, extend wait time");
            return Err(SendError::UnderlayNotReady);
        }
        destination.socket_addr().ok_or_else(|| {
            tracing::error!("refusing to send a unit with an unspecified destination");
            SendError::UnspecifiedDestination
        })
    }
}
