//! RPC correlation table: matches responses and timeouts to outstanding calls.
//!
//! Flow:
//! 1. The owner calls `issue()` and gets a `Transmission` to put on the wire
//!    (or hand to an in-node component).
//! 2. A matching response is passed to `complete()`, which removes the call
//!    and reports its round-trip time.
//! 3. The owner calls `poll_timeouts()` once the earliest deadline
//!    (`next_deadline()`) is due. Calls with retries left are re-transmitted
//!    with a fresh deadline; the rest expire and are removed.
//!
//! The table never blocks and never reads the clock itself; every operation
//! takes `now`. Each call produces at most one terminal outcome: completed,
//! expired, or cancelled.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use pithos_core::{CallId, CallPayload, CallTarget, ResponsePayload};

/// Opaque caller data handed back with the outcome of a call.
pub type CallContext = serde_json::Value;

/// Receives the outcome of a call it was registered for.
pub trait RpcListener: Send {
    fn on_response(
        &mut self,
        call_id: CallId,
        response: ResponsePayload,
        context: Option<CallContext>,
        rtt: Duration,
    );

    fn on_timeout(&mut self, call_id: CallId, target: CallTarget, context: Option<CallContext>);
}

/// Everything needed to issue a call.
#[derive(Debug)]
pub struct CallRequest<L> {
    pub target: CallTarget,
    pub payload: CallPayload,
    pub context: Option<CallContext>,
    pub timeout: Duration,
    pub retries: u32,
    pub listener: L,
}

/// One outstanding call.
#[derive(Debug)]
pub struct PendingCall<L> {
    pub call_id: CallId,
    pub target: CallTarget,
    pub payload: CallPayload,
    pub context: Option<CallContext>,
    pub timeout: Duration,
    pub deadline: Instant,
    pub retries_left: u32,
    /// Transmissions so far, including the first.
    pub attempts: u32,
    /// When the most recent transmission went out.
    pub sent_at: Instant,
    pub listener: L,
}

/// A (re)transmission the owner must deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    pub call_id: CallId,
    pub target: CallTarget,
    pub payload: CallPayload,
    pub attempt: u32,
}

/// A call matched by its response.
#[derive(Debug)]
pub struct Completed<L> {
    pub call: PendingCall<L>,
    pub rtt: Duration,
}

/// What a due deadline turned into.
#[derive(Debug)]
pub enum TimeoutEvent<L> {
    Retry(Transmission),
    Expired(PendingCall<L>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RpcStats {
    pub issued: u64,
    pub transmissions: u64,
    pub completed: u64,
    pub expired: u64,
    pub cancelled: u64,
    pub unmatched: u64,
}

pub struct RpcTable<L> {
    pending: HashMap<CallId, PendingCall<L>>,
    next_id: u32,
    stats: RpcStats,
}

impl<L> Default for RpcTable<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L> RpcTable<L> {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            next_id: 0,
            stats: RpcStats::default(),
        }
    }

    /// Register a call and return its first transmission.
    pub fn issue(&mut self, request: CallRequest<L>, now: Instant) -> Transmission {
        let call_id = self.allocate_id();
        let transmission = Transmission {
            call_id,
            target: request.target,
            payload: request.payload.clone(),
            attempt: 1,
        };

        self.pending.insert(
            call_id,
            PendingCall {
                call_id,
                target: request.target,
                payload: request.payload,
                context: request.context,
                timeout: request.timeout,
                deadline: now + request.timeout,
                retries_left: request.retries,
                attempts: 1,
                sent_at: now,
                listener: request.listener,
            },
        );
        self.stats.issued += 1;
        self.stats.transmissions += 1;

        tracing::debug!(
            call_id = %call_id,
            target = ?request.target,
            retries = request.retries,
            "call issued"
        );
        transmission
    }

    /// Match a response to its call. Returns `None` for unknown ids
    /// (already expired, cancelled, or a duplicate response).
    pub fn complete(&mut self, call_id: CallId, now: Instant) -> Option<Completed<L>> {
        match self.pending.remove(&call_id) {
            Some(call) => {
                let rtt = now.saturating_duration_since(call.sent_at);
                self.stats.completed += 1;
                tracing::debug!(
                    call_id = %call_id,
                    rtt_ms = rtt.as_millis() as u64,
                    attempts = call.attempts,
                    "call completed"
                );
                Some(Completed { call, rtt })
            }
            None => {
                self.stats.unmatched += 1;
                tracing::warn!(call_id = %call_id, "response for unknown or expired call");
                None
            }
        }
    }

    /// Process every call whose deadline is at or before `now`, earliest first.
    pub fn poll_timeouts(&mut self, now: Instant) -> Vec<TimeoutEvent<L>> {
        let mut due: Vec<(Instant, CallId)> = self
            .pending
            .values()
            .filter(|c| c.deadline <= now)
            .map(|c| (c.deadline, c.call_id))
            .collect();
        due.sort();

        let mut events = Vec::with_capacity(due.len());
        for (_, call_id) in due {
            let Some(call) = self.pending.get_mut(&call_id) else {
                continue;
            };

            if call.retries_left > 0 {
                call.retries_left -= 1;
                call.attempts += 1;
                call.sent_at = now;
                call.deadline = now + call.timeout;
                self.stats.transmissions += 1;
                tracing::debug!(
                    call_id = %call_id,
                    attempt = call.attempts,
                    retries_left = call.retries_left,
                    "call timed out, retrying"
                );
                events.push(TimeoutEvent::Retry(Transmission {
                    call_id,
                    target: call.target,
                    payload: call.payload.clone(),
                    attempt: call.attempts,
                }));
            } else if let Some(call) = self.pending.remove(&call_id) {
                self.stats.expired += 1;
                tracing::debug!(call_id = %call_id, attempts = call.attempts, "call expired");
                events.push(TimeoutEvent::Expired(call));
            }
        }
        events
    }

    /// Drop a call without notifying anyone. Its deadline goes with it.
    pub fn cancel(&mut self, call_id: CallId) -> Option<PendingCall<L>> {
        let call = self.pending.remove(&call_id)?;
        self.stats.cancelled += 1;
        tracing::debug!(call_id = %call_id, "call cancelled");
        Some(call)
    }

    /// The earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|c| c.deadline).min()
    }

    /// Where a pending call was sent.
    pub fn target(&self, call_id: CallId) -> Option<CallTarget> {
        self.pending.get(&call_id).map(|c| c.target)
    }

    pub fn is_pending(&self, call_id: CallId) -> bool {
        self.pending.contains_key(&call_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn stats(&self) -> RpcStats {
        self.stats
    }

    fn allocate_id(&mut self) -> CallId {
        loop {
            self.next_id = self.next_id.wrapping_add(1);
            let id = CallId(self.next_id);
            if self.next_id != 0 && !self.pending.contains_key(&id) {
                return id;
            }
        }
    }
}
