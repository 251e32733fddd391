use std::collections::{HashSet, VecDeque};

use courier_core::ids::EventId;

/// Bounded, insertion-ordered set of recently seen event identities.
///
/// The window only has to cover the redelivery burst that follows a
/// reconnect, so eviction is coarse: once the set grows past `capacity`,
/// the oldest entries are dropped until `retain` remain.
#[derive(Debug)]
pub struct DedupCache {
    members: HashSet<EventId>,
    order: VecDeque<EventId>,
    capacity: usize,
    retain: usize,
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(500)
    }
}

impl DedupCache {
    /// `capacity` is clamped to at least 2 so that half of it is never empty.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            members: HashSet::with_capacity(capacity + 1),
            order: VecDeque::with_capacity(capacity + 1),
            capacity,
            retain: capacity / 2,
        }
    }

    pub fn seen(&self, id: &EventId) -> bool {
        self.members.contains(id)
    }

    /// Record an identity. Re-recording keeps its original position.
    pub fn record(&mut self, id: EventId) {
        if !self.members.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            self.evict();
        }
    }

    fn evict(&mut self) {
        let excess = self.order.len().saturating_sub(self.retain);
        for old in self.order.drain(..excess) {
            let _ = self.members.remove(&old);
        }
        tracing::trace!(retained = self.order.len(), evicted = excess, "dedup eviction pass");
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.members.clear();
        self.order.clear();
    }
}
