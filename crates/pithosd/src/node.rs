//! Node actor: one communicator, one task, one event queue.
//!
//! Events are processed strictly in arrival order, each to completion
//! (including everything the sub-components queue while handling it)
//! before the next is taken. RPC deadlines are the only timers; the task
//! sleeps until the earliest one when the queue is idle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};

use pithos_core::{CallPayload, CallTarget, OverlayKey, TransportAddress, Unit};
use pithos_services::{MetricsSink, Port, TrafficSnapshot};

use crate::communicator::{CallOptions, Communicator, Listener};
use crate::error::RouteError;

/// Idle wake-up when no call is pending.
const IDLE_WAKE: Duration = Duration::from_secs(3600);

pub enum NodeEvent {
    Datagram {
        source: SocketAddr,
        datagram: Bytes,
    },
    Route {
        port: Port,
        unit: Unit,
    },
    Deliver {
        key: OverlayKey,
        unit: Unit,
    },
    Call {
        target: CallTarget,
        payload: CallPayload,
        options: CallOptions,
        listener: Listener,
    },
    Snapshot(oneshot::Sender<TrafficSnapshot>),
}

#[derive(Debug, thiserror::Error)]
#[error("node {0} has stopped")]
pub struct NodeStopped(pub TransportAddress);

/// Cloneable sender side of a node's event queue.
#[derive(Clone, Debug)]
pub struct NodeHandle {
    address: TransportAddress,
    events: mpsc::UnboundedSender<NodeEvent>,
}

/// Receiver side of a node's event queue, consumed by `Node::new`.
pub struct NodeInbox(mpsc::UnboundedReceiver<NodeEvent>);

/// Create the event queue for the node at `address`. The handle exists
/// before the node so collaborators can be wired to it.
pub fn channel(address: TransportAddress) -> (NodeHandle, NodeInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (NodeHandle { address, events: tx }, NodeInbox(rx))
}

impl NodeInbox {
    pub fn into_inner(self) -> mpsc::UnboundedReceiver<NodeEvent> {
        self.0
    }
}

impl NodeHandle {
    pub fn address(&self) -> TransportAddress {
        self.address
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    pub fn datagram(&self, source: SocketAddr, datagram: Bytes) -> Result<(), NodeStopped> {
        self.send(NodeEvent::Datagram { source, datagram })
    }

    pub fn route(&self, port: Port, unit: Unit) -> Result<(), NodeStopped> {
        self.send(NodeEvent::Route { port, unit })
    }

    /// Hand a unit down from the application tier.
    pub fn submit(&self, unit: Unit) -> Result<(), NodeStopped> {
        self.route(Port::Application, unit)
    }

    pub fn deliver(&self, key: OverlayKey, unit: Unit) -> Result<(), NodeStopped> {
        self.send(NodeEvent::Deliver { key, unit })
    }

    pub fn call(
        &self,
        target: CallTarget,
        payload: CallPayload,
        options: CallOptions,
        listener: Listener,
    ) -> Result<(), NodeStopped> {
        self.send(NodeEvent::Call {
            target,
            payload,
            options,
            listener,
        })
    }

    pub fn ping(&self, destination: TransportAddress, options: CallOptions) -> Result<(), NodeStopped> {
        self.call(
            CallTarget::External(destination),
            CallPayload::Ping,
            options,
            Listener::Default,
        )
    }

    /// Current traffic counters of the node.
    pub async fn snapshot(&self) -> Result<TrafficSnapshot, NodeStopped> {
        let (tx, rx) = oneshot::channel();
        self.send(NodeEvent::Snapshot(tx))?;
        rx.await.map_err(|_| NodeStopped(self.address))
    }

    fn send(&self, event: NodeEvent) -> Result<(), NodeStopped> {
        self.events.send(event).map_err(|_| NodeStopped(self.address))
    }
}

/// What a node leaves behind when it stops cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    pub address: TransportAddress,
    pub traffic: TrafficSnapshot,
    /// Whether rate statistics were published at finish.
    pub rates_published: bool,
}

pub struct Node {
    communicator: Communicator,
    events: mpsc::UnboundedReceiver<NodeEvent>,
    shutdown: broadcast::Receiver<()>,
    metrics: Arc<dyn MetricsSink>,
}

impl Node {
    pub fn new(
        communicator: Communicator,
        inbox: NodeInbox,
        shutdown: broadcast::Receiver<()>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            communicator,
            events: inbox.0,
            shutdown,
            metrics,
        }
    }

    /// Run until shutdown, until every handle is dropped, or until a fatal
    /// error. Fatal errors are returned to the owner; the process lives on.
    pub async fn run(mut self) -> Result<NodeReport, RouteError> {
        let address = self.communicator.address();
        tracing::info!(%address, role = ?self.communicator.role(), "node running");

        loop {
            let deadline = self.communicator.next_deadline();
            let wake_at = deadline
                .map(tokio::time::Instant::from_std)
                .unwrap_or_else(|| tokio::time::Instant::now() + IDLE_WAKE);

            tokio::select! {
                biased;

                _ = self.shutdown.recv() => {
                    tracing::info!(%address, "node shutting down");
                    break;
                }

                event = self.events.recv() => match event {
                    Some(event) => {
                        let result = self.handle(event);
                        self.check(result)?;
                    }
                    None => {
                        tracing::info!(%address, "all handles dropped, node stopping");
                        break;
                    }
                },

                _ = tokio::time::sleep_until(wake_at), if deadline.is_some() => {
                    let result = self.communicator.poll_timeouts(Instant::now());
                    self.check(result)?;
                }
            }

            let result = self.communicator.pump(Instant::now());
            self.check(result)?;
        }

        let rates_published = self.communicator.finish(Instant::now(), self.metrics.as_ref());
        Ok(NodeReport {
            address,
            traffic: self.communicator.snapshot(),
            rates_published,
        })
    }

    fn handle(&mut self, event: NodeEvent) -> Result<(), RouteError> {
        let now = Instant::now();
        match event {
            NodeEvent::Datagram { source, datagram } => {
                let received = self.communicator.handle_datagram(source, &datagram, now)?;
                tracing::trace!(%source, ?received, "datagram handled");
            }
            NodeEvent::Route { port, unit } => {
                let disposition = self.communicator.route(port, unit)?;
                tracing::trace!(?port, ?disposition, "unit routed");
            }
            NodeEvent::Deliver { key, unit } => {
                let disposition = self.communicator.deliver(key, unit);
                tracing::trace!(%key, ?disposition, "overlay delivery handled");
            }
            NodeEvent::Call {
                target,
                payload,
                options,
                listener,
            } => {
                let call_id = self
                    .communicator
                    .issue_call(target, payload, options, listener, now)?;
                tracing::debug!(call_id = %call_id, ?target, "call issued");
            }
            NodeEvent::Snapshot(reply) => {
                let _ = reply.send(self.communicator.snapshot());
            }
        }
        Ok(())
    }

    fn check<T>(&self, result: Result<T, RouteError>) -> Result<(), RouteError> {
        match result {
            Err(e) if e.is_fatal() => {
                tracing::error!(node = %self.communicator.address(), error = %e, "fatal error, stopping node");
                Err(e)
            }
            Err(e) => {
                tracing::warn!(node = %self.communicator.address(), error = %e, "event dropped");
                Ok(())
            }
            Ok(_) => Ok(()),
        }
    }
}
