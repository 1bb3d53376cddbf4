//! A cache entry: one in-memory page plus its bookkeeping.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::common::PageId;
use crate::storage::page::Page;

/// An entry of a cache partition's page table.
///
/// Holds the decoded page behind its access-mode lock, the pin count that
/// shields it from eviction, and the dirty flag driving write-back.
///
/// # Thread Safety
/// The page itself is guarded by the `RwLock`; pin count and dirty flag are
/// atomics. Pin-count *transitions* are only performed under the owning
/// partition's mutex so the eviction policy's evictable bookkeeping can
/// never disagree with the count.
pub(crate) struct CachedPage {
    id: PageId,
    page: Arc<RwLock<Page>>,
    pin_count: AtomicU32,
    dirty: AtomicBool,
}

impl CachedPage {
    pub(crate) fn new(id: PageId, page: Page, dirty: bool) -> Self {
        Self {
            id,
            page: Arc::new(RwLock::new(page)),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(dirty),
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> PageId {
        self.id
    }

    /// The page slot; accessors lock it in their granted mode.
    #[inline]
    pub(crate) fn page(&self) -> &Arc<RwLock<Page>> {
        &self.page
    }

    // ========================================================================
    // Pin count
    // ========================================================================

    /// Increment the pin count. Returns the new pin count.
    #[inline]
    pub(crate) fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrement the pin count. Returns the new pin count.
    ///
    /// # Panics
    /// Panics if the pin count is already 0.
    #[inline]
    pub(crate) fn unpin(&self) -> u32 {
        let old = self.pin_count.fetch_sub(1, Ordering::Relaxed);
        assert!(old > 0, "pin count underflow");
        old - 1
    }

    #[inline]
    pub(crate) fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    // ========================================================================
    // Dirty flag
    // ========================================================================

    #[inline]
    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }
}
