//! RAII accessors for cached pages.
//!
//! An accessor binds a cached page to the access mode it was granted under:
//! - [`SharedPageAccessor`] - shared access, read-only, any number may
//!   coexist for one page
//! - [`ExclusivePageAccessor`] - exclusive access, mutation allowed, excludes
//!   all other accessors for that page
//!
//! Both keep the page pinned; dropping an accessor releases the mode lock
//! and then the pin, exactly once, even when an error unwinds through code
//! holding it.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;

use crate::buffer::cached_page::CachedPage;
use crate::buffer::page_manager::PartitionedPageManager;
use crate::common::PageId;
use crate::storage::page::Page;

/// Keeps a cache entry pinned; unpins on drop.
///
/// Declared after the lock guard in both accessors, so the drop order is:
/// release the page lock, then surrender the pin.
struct PinGuard<'a> {
    manager: &'a PartitionedPageManager,
    entry: Arc<CachedPage>,
}

impl Drop for PinGuard<'_> {
    fn drop(&mut self) {
        self.manager.release_page(&self.entry);
    }
}

/// Shared (read-only) access to one cached page.
///
/// # Example
/// ```ignore
/// let page = manager.get_page_shared(page_id)?;
/// let leaf = page.as_leaf_node()?; // Deref to &Page
/// // drops here: lock released, pin surrendered
/// ```
pub struct SharedPageAccessor<'a> {
    guard: ArcRwLockReadGuard<RawRwLock, Page>,
    pin: PinGuard<'a>,
}

impl<'a> SharedPageAccessor<'a> {
    pub(crate) fn new(
        manager: &'a PartitionedPageManager,
        entry: Arc<CachedPage>,
        guard: ArcRwLockReadGuard<RawRwLock, Page>,
    ) -> Self {
        Self {
            guard,
            pin: PinGuard { manager, entry },
        }
    }

    /// ID of the accessed page.
    #[inline]
    pub fn id(&self) -> PageId {
        self.pin.entry.id()
    }

    /// The underlying page instance.
    #[inline]
    pub fn instance(&self) -> &Page {
        &self.guard
    }
}

impl Deref for SharedPageAccessor<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        &self.guard
    }
}

/// Exclusive access to one cached page.
///
/// Mutate through `DerefMut`, then hand the accessor to
/// [`PartitionedPageManager::write_page`] to persist.
pub struct ExclusivePageAccessor<'a> {
    guard: ArcRwLockWriteGuard<RawRwLock, Page>,
    pin: PinGuard<'a>,
}

impl<'a> ExclusivePageAccessor<'a> {
    pub(crate) fn new(
        manager: &'a PartitionedPageManager,
        entry: Arc<CachedPage>,
        guard: ArcRwLockWriteGuard<RawRwLock, Page>,
    ) -> Self {
        Self {
            guard,
            pin: PinGuard { manager, entry },
        }
    }

    /// ID of the accessed page.
    #[inline]
    pub fn id(&self) -> PageId {
        self.pin.entry.id()
    }

    /// The underlying page instance.
    #[inline]
    pub fn instance(&self) -> &Page {
        &self.guard
    }

    pub(crate) fn entry(&self) -> &CachedPage {
        &self.pin.entry
    }
}

impl Deref for ExclusivePageAccessor<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        &self.guard
    }
}

impl DerefMut for ExclusivePageAccessor<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Page {
        &mut self.guard
    }
}
