//! Storage accounting queue: FIFO record of the objects a node stores.
//!
//! Entries are never evicted. Duplicate names coexist; the queue is not
//! keyed by name. The byte total is a `u128` kept incrementally; it always
//! equals the sum of the sizes of the current entries.

use std::collections::VecDeque;
use std::sync::Arc;

use pithos_core::StoredObject;

use crate::metrics::MetricsSink;

/// Metric name under which the queue length is published.
pub const QUEUE_LENGTH_METRIC: &str = "qlen";

/// One stored item, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
    pub object: StoredObject,
}

impl StorageEntry {
    pub fn size(&self) -> u64 {
        self.object.size()
    }
}

pub struct StorageQueue {
    entries: VecDeque<StorageEntry>,
    total_bytes: u128,
    metrics: Arc<dyn MetricsSink>,
}

impl StorageQueue {
    /// Create an empty queue and publish its initial length.
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        metrics.observe(QUEUE_LENGTH_METRIC, 0.0);
        Self {
            entries: VecDeque::new(),
            total_bytes: 0,
            metrics,
        }
    }

    /// Append an object and republish the queue length.
    pub fn push(&mut self, object: StoredObject) {
        tracing::debug!(name = object.name(), size = object.size(), "storing object");
        self.total_bytes += u128::from(object.size());
        self.entries.push_back(StorageEntry { object });
        self.metrics
            .observe(QUEUE_LENGTH_METRIC, self.entries.len() as f64);
    }

    /// Sum of the declared sizes of every entry.
    pub fn total_bytes(&self) -> u128 {
        self.total_bytes
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &StorageEntry> {
        self.entries.iter()
    }

    /// Oldest entry stored under `name`.
    pub fn find(&self, name: &str) -> Option<&StoredObject> {
        self.entries
            .iter()
            .map(|e| &e.object)
            .find(|o| o.name() == name)
    }
}
