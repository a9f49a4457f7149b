//! Metrics sink and per-node traffic counters.
//!
//! Counters are owned by the node that updates them. Reporting code reads
//! them through `snapshot()` and may `reset()` them between reporting
//! windows; nothing here is global.

use std::sync::{Arc, Mutex};

use serde::Serialize;

/// Accepts named numeric observations.
pub trait MetricsSink: Send + Sync {
    fn observe(&self, name: &str, value: f64);
}

/// Sink that emits every observation as a tracing event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn observe(&self, name: &str, value: f64) {
        tracing::debug!(metric = name, value, "observation");
    }
}

/// Sink that keeps every observation in memory, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct MemoryMetrics {
    observations: Arc<Mutex<Vec<(String, f64)>>>,
}

impl MemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// All observations recorded so far.
    pub fn observations(&self) -> Vec<(String, f64)> {
        self.lock().clone()
    }

    /// Every value recorded under `name`, oldest first.
    pub fn values(&self, name: &str) -> Vec<f64> {
        self.lock()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| *v)
            .collect()
    }

    /// Most recent value recorded under `name`.
    pub fn last(&self, name: &str) -> Option<f64> {
        self.values(name).last().copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, f64)>> {
        self.observations.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl MetricsSink for MemoryMetrics {
    fn observe(&self, name: &str, value: f64) {
        self.lock().push((name.to_string(), value));
    }
}

/// Point-in-time view of a node's traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrafficSnapshot {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Send/receive accumulators for one node.
#[derive(Debug, Default)]
pub struct TrafficCounters {
    current: TrafficSnapshot,
}

impl TrafficCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&mut self, bytes: u32) {
        self.current.packets_sent += 1;
        self.current.bytes_sent += u64::from(bytes);
    }

    pub fn record_received(&mut self, bytes: u32) {
        self.current.packets_received += 1;
        self.current.bytes_received += u64::from(bytes);
    }

    pub fn snapshot(&self) -> TrafficSnapshot {
        self.current
    }

    /// Zero the counters, returning the values they held.
    pub fn reset(&mut self) -> TrafficSnapshot {
        std::mem::take(&mut self.current)
    }
}
