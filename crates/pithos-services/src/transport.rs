//! Collaborators below and beside the communicator: the datagram transport,
//! the key-routing overlay, and the bootstrap readiness query.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use pithos_core::{OverlayKey, Unit};

/// Datagram send primitive.
pub trait Transport: Send {
    fn send_to(&mut self, destination: SocketAddr, datagram: Bytes) -> Result<()>;
}

/// Key-based routing primitive. The overlay takes ownership of the unit and
/// hands it to whichever node currently owns `key`.
pub trait Overlay: Send {
    fn route(&mut self, key: OverlayKey, unit: Unit) -> Result<()>;
}

/// Whether the underlay finished bootstrapping.
pub trait Bootstrap: Send + Sync {
    fn is_ready(&self) -> bool;
}

/// Shared readiness flag, flipped by whoever owns the bootstrap.
#[derive(Debug, Clone, Default)]
pub struct ReadyFlag(Arc<AtomicBool>);

impl ReadyFlag {
    pub fn new(ready: bool) -> Self {
        Self(Arc::new(AtomicBool::new(ready)))
    }

    pub fn set_ready(&self, ready: bool) {
        self.0.store(ready, Ordering::Release);
    }
}

impl Bootstrap for ReadyFlag {
    fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
