//! In-process transport and overlay shared by several nodes.
//!
//! `LocalFabric` is a registry of node handles keyed by transport address.
//! Datagrams are delivered straight into the destination node's queue; a
//! datagram for an unknown or stopped node is lost, as it would be on a
//! real network. The overlay routes a key to the registered node whose
//! overlay key is XOR-closest. It is a stand-in for a real overlay, used
//! for devnets and tests.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use dashmap::DashMap;

use pithos_core::{OverlayKey, Unit};
use pithos_services::{Overlay, Transport};

use crate::node::NodeHandle;

#[derive(Clone)]
struct FabricEntry {
    handle: NodeHandle,
    key: OverlayKey,
}

#[derive(Clone, Default)]
pub struct LocalFabric {
    nodes: Arc<DashMap<SocketAddr, FabricEntry>>,
}

impl LocalFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node. Replaces any node previously registered at `address`.
    pub fn register(&self, address: SocketAddr, key: OverlayKey, handle: NodeHandle) {
        tracing::debug!(%address, %key, "node joined fabric");
        self.nodes.insert(address, FabricEntry { handle, key });
    }

    pub fn unregister(&self, address: &SocketAddr) -> bool {
        self.nodes.remove(address).is_some()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Transport for the node at `local`.
    pub fn transport(&self, local: SocketAddr) -> FabricTransport {
        FabricTransport {
            fabric: self.clone(),
            local,
        }
    }

    pub fn overlay(&self) -> FabricOverlay {
        FabricOverlay {
            fabric: self.clone(),
        }
    }

    /// The registered node whose key is XOR-closest to `key`. Ties go to
    /// the lower address.
    pub fn closest(&self, key: &OverlayKey) -> Option<NodeHandle> {
        self.nodes
            .iter()
            .min_by_key(|e| (e.value().key.distance(key), *e.key()))
            .map(|e| e.value().handle.clone())
    }

    fn handle(&self, address: &SocketAddr) -> Option<NodeHandle> {
        self.nodes.get(address).map(|e| e.handle.clone())
    }
}

pub struct FabricTransport {
    fabric: LocalFabric,
    local: SocketAddr,
}

impl Transport for FabricTransport {
    fn send_to(&mut self, destination: SocketAddr, datagram: Bytes) -> Result<()> {
        match self.fabric.handle(&destination) {
            Some(handle) => {
                if handle.datagram(self.local, datagram).is_err() {
                    tracing::debug!(%destination, "destination node stopped, datagram lost");
                }
            }
            None => tracing::debug!(%destination, "no node at destination, datagram lost"),
        }
        Ok(())
    }
}

pub struct FabricOverlay {
    fabric: LocalFabric,
}

impl Overlay for FabricOverlay {
    fn route(&mut self, key: OverlayKey, unit: Unit) -> Result<()> {
        let handle = self
            .fabric
            .closest(&key)
            .ok_or_else(|| anyhow!("no node in the overlay to route {key} to"))?;
        handle.deliver(key, unit)?;
        Ok(())
    }
}

/// Overlay of one: every key is delivered back to the same node.
pub struct LoopbackOverlay {
    handle: NodeHandle,
}

impl LoopbackOverlay {
    pub fn new(handle: NodeHandle) -> Self {
        Self { handle }
    }
}

impl Overlay for LoopbackOverlay {
    fn route(&mut self, key: OverlayKey, unit: Unit) -> Result<()> {
        self.handle.deliver(key, unit)?;
        Ok(())
    }
}
