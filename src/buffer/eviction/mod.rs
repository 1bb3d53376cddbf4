//! Eviction policy strategies.
//!
//! One policy instance exists per cache partition, created through an
//! [`EvictionPolicyFactory`] so policy state never crosses partition
//! boundaries. The manager drives all bookkeeping under the partition lock,
//! which is what lets [`EvictionPolicy::next`] promise to never name a
//! pinned page.
//!
//! Implementations:
//! - [`LruEvictionPolicy`] - recency-based, the default
//! - [`FifoEvictionPolicy`] - insertion-order

mod fifo;
mod lru;

use crate::common::PageId;

pub use fifo::{FifoEvictionPolicy, FifoEvictionPolicyFactory};
pub use lru::{LruEvictionPolicy, LruEvictionPolicyFactory};

/// Victim-selection strategy for one cache partition.
///
/// The manager calls every method with the partition lock held, so
/// implementations need no internal synchronization. Pages start out
/// non-evictable when added and become candidates only after
/// `set_evictable(id, true)`.
pub trait EvictionPolicy: Send {
    /// Register a newly cached page.
    fn add(&mut self, id: PageId);

    /// Record an access, influencing future victim choice.
    fn update(&mut self, id: PageId);

    /// Mark whether a page may be chosen as a victim.
    ///
    /// The manager flips this on pin-count transitions: false when a page
    /// gains its first pin, true when the last pin is surrendered.
    fn set_evictable(&mut self, id: PageId, evictable: bool);

    /// Best eviction candidate, excluding `skip` (the page about to be
    /// inserted, which must never be its own victim).
    ///
    /// Returns `None` when every registered page is non-evictable; the
    /// manager surfaces that as `CacheExhausted`.
    fn next(&mut self, skip: PageId) -> Option<PageId>;

    /// Unregister a page (after eviction).
    fn remove(&mut self, id: PageId);
}

/// Creates one policy instance per cache partition.
pub trait EvictionPolicyFactory: Send + Sync {
    fn create(&self) -> Box<dyn EvictionPolicy>;
}
