//! FIFO (First-In-First-Out) eviction policy.

use std::collections::{HashSet, VecDeque};

use crate::buffer::eviction::{EvictionPolicy, EvictionPolicyFactory};
use crate::common::PageId;

/// Evicts pages in the order they entered the partition.
///
/// Re-accessing a page does not change its position. Useful as a cheap
/// baseline and to exercise the policy seam in tests.
pub struct FifoEvictionPolicy {
    /// Page IDs in insertion order (front = oldest).
    queue: VecDeque<PageId>,

    /// Set for O(1) membership checks.
    registered: HashSet<PageId>,

    /// Pages currently allowed to be evicted.
    evictable: HashSet<PageId>,
}

impl FifoEvictionPolicy {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            registered: HashSet::new(),
            evictable: HashSet::new(),
        }
    }

    /// Number of evictable pages.
    pub fn size(&self) -> usize {
        self.evictable.len()
    }
}

impl Default for FifoEvictionPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl EvictionPolicy for FifoEvictionPolicy {
    fn add(&mut self, id: PageId) {
        if self.registered.insert(id) {
            self.queue.push_back(id);
        }
    }

    fn update(&mut self, _id: PageId) {
        // FIFO: access order is irrelevant.
    }

    fn set_evictable(&mut self, id: PageId, evictable: bool) {
        if !self.registered.contains(&id) {
            return;
        }
        if evictable {
            self.evictable.insert(id);
        } else {
            self.evictable.remove(&id);
        }
    }

    fn next(&mut self, skip: PageId) -> Option<PageId> {
        self.queue
            .iter()
            .find(|&&id| id != skip && self.evictable.contains(&id))
            .copied()
    }

    fn remove(&mut self, id: PageId) {
        if self.registered.remove(&id) {
            self.queue.retain(|&queued| queued != id);
        }
        self.evictable.remove(&id);
    }
}

/// Produces a [`FifoEvictionPolicy`] per partition.
pub struct FifoEvictionPolicyFactory;

impl EvictionPolicyFactory for FifoEvictionPolicyFactory {
    fn create(&self) -> Box<dyn EvictionPolicy> {
        Box::new(FifoEvictionPolicy::new())
    }
}
