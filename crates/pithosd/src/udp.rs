//! UDP transport for a daemon node.
//!
//! The node never awaits the socket. `UdpTransport` queues outgoing
//! datagrams for `send_loop`, and `receive_loop` feeds incoming datagrams
//! into the node's event queue.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};

use pithos_services::Transport;

use crate::node::NodeHandle;

/// Largest datagram accepted from the socket.
const RECV_BUF: usize = 65535;

pub type OutgoingDatagram = (SocketAddr, Bytes);

pub struct UdpTransport {
    outgoing: mpsc::UnboundedSender<OutgoingDatagram>,
}

impl UdpTransport {
    /// Create the transport and the queue `send_loop` drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutgoingDatagram>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { outgoing: tx }, rx)
    }
}

impl Transport for UdpTransport {
    fn send_to(&mut self, destination: SocketAddr, datagram: Bytes) -> Result<()> {
        self.outgoing
            .send((destination, datagram))
            .map_err(|_| anyhow!("udp send loop has stopped"))
    }
}

/// Write queued datagrams to the socket until shutdown or until the
/// transport is dropped.
pub async fn send_loop(
    socket: Arc<UdpSocket>,
    mut outgoing: mpsc::UnboundedReceiver<OutgoingDatagram>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("udp sender shutting down");
                return Ok(());
            }

            next = outgoing.recv() => {
                let Some((destination, datagram)) = next else {
                    tracing::info!("transport dropped, udp sender exiting");
                    return Ok(());
                };
                if let Err(e) = socket.send_to(&datagram, destination).await {
                    tracing::warn!(%destination, error = %e, "send_to failed, datagram lost");
                }
            }
        }
    }
}

/// Feed every received datagram into `node` until shutdown or until the
/// node stops.
pub async fn receive_loop(
    socket: Arc<UdpSocket>,
    node: NodeHandle,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let mut buf = vec![0u8; RECV_BUF];
    tracing::info!(addr = %socket.local_addr()?, "udp receiver starting");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("udp receiver shutting down");
                return Ok(());
            }

            r = socket.recv_from(&mut buf) => {
                let (len, source) = match r {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "recv_from failed");
                        continue;
                    }
                };
                if node.datagram(source, Bytes::copy_from_slice(&buf[..len])).is_err() {
                    tracing::info!("node stopped, udp receiver exiting");
                    return Ok(());
                }
            }
        }
    }
}
