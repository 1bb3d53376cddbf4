//! LRU (Least Recently Used) eviction policy.

use std::collections::{HashMap, HashSet};

use crate::buffer::eviction::{EvictionPolicy, EvictionPolicyFactory};
use crate::common::PageId;

/// Evicts the least recently accessed evictable page.
///
/// Recency is tracked with a monotonic access stamp per page; victim
/// selection scans the evictable set for the smallest stamp. Partitions are
/// small, so the scan is cheap and keeps update O(1).
pub struct LruEvictionPolicy {
    /// Monotonic access clock.
    clock: u64,

    /// Last-access stamp per registered page.
    last_access: HashMap<PageId, u64>,

    /// Pages currently allowed to be evicted.
    evictable: HashSet<PageId>,
}

impl LruEvictionPolicy {
    pub fn new() -> Self {
        Self {
            clock: 0,
            last_access: HashMap::new(),
            evictable: HashSet::new(),
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Number of evictable pages.
    pub fn size(&self) -> usize {
        self.evictable.len()
    }
}

impl Default for LruEvictionPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl EvictionPolicy for LruEvictionPolicy {
    fn add(&mut self, id: PageId) {
        let stamp = self.tick();
        self.last_access.insert(id, stamp);
    }

    fn update(&mut self, id: PageId) {
        if self.last_access.contains_key(&id) {
            let stamp = self.tick();
            self.last_access.insert(id, stamp);
        }
    }

    fn set_evictable(&mut self, id: PageId, evictable: bool) {
        if !self.last_access.contains_key(&id) {
            return;
        }
        if evictable {
            self.evictable.insert(id);
        } else {
            self.evictable.remove(&id);
        }
    }

    fn next(&mut self, skip: PageId) -> Option<PageId> {
        self.evictable
            .iter()
            .filter(|&&id| id != skip)
            .min_by_key(|&&id| self.last_access.get(&id).copied().unwrap_or(0))
            .copied()
    }

    fn remove(&mut self, id: PageId) {
        self.last_access.remove(&id);
        self.evictable.remove(&id);
    }
}

/// Produces an [`LruEvictionPolicy`] per partition.
pub struct LruEvictionPolicyFactory;

impl EvictionPolicyFactory for LruEvictionPolicyFactory {
    fn create(&self) -> Box<dyn EvictionPolicy> {
        Box::new(LruEvictionPolicy::new())
    }
}
