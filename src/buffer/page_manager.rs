//! Partitioned page manager - the core page caching layer.
//!
//! The [`PartitionedPageManager`] is the sole authority for moving pages
//! between memory and durable storage. It serves pages by identity under a
//! requested access mode, fills misses by reading through to storage, and
//! bounds memory by evicting victims chosen by a per-partition
//! [`EvictionPolicy`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::accessor::{ExclusivePageAccessor, SharedPageAccessor};
use crate::buffer::cached_page::CachedPage;
use crate::buffer::eviction::{EvictionPolicy, EvictionPolicyFactory, LruEvictionPolicyFactory};
use crate::buffer::stats::CacheStats;
use crate::buffer::writer::{PageWriter, PageWriterFactory, SyncPageWriterFactory};
use crate::common::config::{
    DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_PARTITIONS, PAGE_SIZE,
};
use crate::common::{Error, PageId, Result};
use crate::storage::page::{Page, PageType};
use crate::storage::Storage;

/// Sizing knobs for the page cache.
#[derive(Debug, Clone, Copy)]
pub struct PageManagerOptions {
    /// Total cache capacity across all partitions, in pages.
    pub capacity: usize,

    /// Number of partitions the ID space is split across.
    pub partitions: usize,
}

impl Default for PageManagerOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
            partitions: DEFAULT_CACHE_PARTITIONS,
        }
    }
}

/// One shard of the ID space: its own page table, eviction policy and
/// write-back instance, guarded by one mutex.
///
/// The mutex is held for table and bookkeeping mutation only - never while
/// waiting on a page's access-mode lock - so traversal in one partition
/// cannot deadlock with eviction in another.
struct Partition {
    inner: Mutex<PartitionInner>,
}

struct PartitionInner {
    table: HashMap<PageId, Arc<CachedPage>>,
    policy: Box<dyn EvictionPolicy>,
    writer: Box<dyn PageWriter>,
}

/// Page cache partitioned by page ID.
///
/// # Architecture
/// ```text
/// ┌──────────────────────────────────────────────────────────────┐
/// │                   PartitionedPageManager                     │
/// │  ┌──────────────── partition = id mod N ─────────────────┐   │
/// │  │ Partition 0        Partition 1        Partition N-1   │   │
/// │  │ ┌────────────┐    ┌────────────┐     ┌────────────┐   │   │
/// │  │ │ page table │    │ page table │ ... │ page table │   │   │
/// │  │ │ policy     │    │ policy     │     │ policy     │   │   │
/// │  │ │ writer     │    │ writer     │     │ writer     │   │   │
/// │  │ └────────────┘    └────────────┘     └────────────┘   │   │
/// │  └────────────────────────────────────────────────────────┘  │
/// │                  storage: Arc<dyn Storage>                   │
/// └──────────────────────────────────────────────────────────────┘
/// ```
///
/// # Thread Safety
/// - Each partition's table/policy/writer sit behind that partition's mutex.
/// - Each cached page carries its own `RwLock`; accessors hold it in their
///   granted mode. Page locks are never acquired under a partition mutex.
/// - Pin counts shield pages from eviction; all pin transitions happen under
///   the owning partition's mutex so the policy's evictable bookkeeping
///   stays exact.
///
/// # Usage
/// ```ignore
/// let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
/// let manager = PartitionedPageManager::with_defaults(storage)?;
///
/// let mut page = manager.create_page(PageType::LeafNode)?;
/// page.as_leaf_node_mut()?.set_next_leaf_node_page(PageId::new(9));
/// manager.write_page(&page)?;
/// ```
pub struct PartitionedPageManager {
    storage: Arc<dyn Storage>,

    partitions: Vec<Partition>,

    /// Capacity of each partition, in pages.
    partition_capacity: usize,

    /// Next ID to hand out from `create_page`. Seeded from the storage size
    /// at open, which is what persists the counter across runs.
    next_page_id: AtomicU64,

    stats: CacheStats,
}

impl PartitionedPageManager {
    /// Create a manager over `storage` with injected strategies.
    ///
    /// # Errors
    /// `CorruptedFile` if the storage size is not page-aligned.
    ///
    /// # Panics
    /// Panics if `options.partitions` is 0 or exceeds `options.capacity`.
    pub fn new(
        storage: Arc<dyn Storage>,
        writer_factory: &dyn PageWriterFactory,
        policy_factory: &dyn EvictionPolicyFactory,
        options: PageManagerOptions,
    ) -> Result<Self> {
        assert!(options.partitions > 0, "partitions must be > 0");
        assert!(
            options.capacity >= options.partitions,
            "capacity must cover every partition"
        );

        let size = storage.size()?;
        if size % PAGE_SIZE as u64 != 0 {
            return Err(Error::CorruptedFile("storage size is not page-aligned"));
        }
        // Page slot 0 is never used; a store holding pages 1..=k has
        // (k + 1) * PAGE_SIZE bytes, so size/PAGE_SIZE is the next fresh ID.
        let next_page_id = (size / PAGE_SIZE as u64).max(1);

        let partitions = (0..options.partitions)
            .map(|_| Partition {
                inner: Mutex::new(PartitionInner {
                    table: HashMap::new(),
                    policy: policy_factory.create(),
                    writer: writer_factory.create(),
                }),
            })
            .collect();

        Ok(Self {
            storage,
            partitions,
            partition_capacity: options.capacity / options.partitions,
            next_page_id: AtomicU64::new(next_page_id),
            stats: CacheStats::new(),
        })
    }

    /// Create a manager with the default strategies: synchronous
    /// write-through and LRU eviction.
    pub fn with_defaults(storage: Arc<dyn Storage>) -> Result<Self> {
        let writer_factory = SyncPageWriterFactory::new(Arc::clone(&storage));
        Self::new(
            storage,
            &writer_factory,
            &LruEvictionPolicyFactory,
            PageManagerOptions::default(),
        )
    }

    // ========================================================================
    // Public API: page access
    // ========================================================================

    /// Get a page under SHARED access.
    ///
    /// Serves from cache or reads through to storage, then blocks until the
    /// page's lock is available in shared mode.
    ///
    /// # Errors
    /// - `PageNotFound` if `id` lies beyond the storage
    /// - `CorruptedPage` if the stored bytes fail to decode
    /// - `CacheExhausted` if the partition is full of pinned pages
    pub fn get_page_shared(&self, id: PageId) -> Result<SharedPageAccessor<'_>> {
        let entry = self.lookup_or_load(id)?;
        let guard = entry.page().read_arc();
        Ok(SharedPageAccessor::new(self, entry, guard))
    }

    /// Get a page under EXCLUSIVE access.
    ///
    /// Same as [`get_page_shared`](Self::get_page_shared), but the returned
    /// accessor excludes all other accessors for the page and permits
    /// mutation.
    pub fn get_page_exclusive(&self, id: PageId) -> Result<ExclusivePageAccessor<'_>> {
        let entry = self.lookup_or_load(id)?;
        let guard = entry.page().write_arc();
        Ok(ExclusivePageAccessor::new(self, entry, guard))
    }

    /// Allocate the next page ID and cache a fresh, dirty page of the given
    /// type under EXCLUSIVE access.
    ///
    /// The page reaches storage when written via
    /// [`write_page`](Self::write_page), when evicted, or at
    /// [`flush_all_pages`](Self::flush_all_pages).
    pub fn create_page(&self, page_type: PageType) -> Result<ExclusivePageAccessor<'_>> {
        let id = PageId(self.next_page_id.fetch_add(1, Ordering::SeqCst));
        let page = Page::new(page_type);

        let partition = self.partition_for(id);
        let entry = {
            let mut inner = partition.inner.lock();
            self.insert_entry(&mut inner, id, page, true)?
        };

        let guard = entry.page().write_arc();
        Ok(ExclusivePageAccessor::new(self, entry, guard))
    }

    /// Persist a page being mutated through `accessor`.
    ///
    /// Marks the page dirty and immediately writes it through the owning
    /// partition's writer (write-through policy), clearing the flag again.
    pub fn write_page(&self, accessor: &ExclusivePageAccessor<'_>) -> Result<()> {
        let id = accessor.id();
        let partition = self.partition_for(id);
        let mut inner = partition.inner.lock();

        accessor.entry().mark_dirty();
        inner.writer.write(id, accessor.instance())?;
        accessor.entry().clear_dirty();

        self.stats.pages_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Whether `id` currently resides in the cache.
    ///
    /// Introspection/testing aid; answers can go stale immediately.
    pub fn is_page_managed(&self, id: PageId) -> bool {
        self.partition_for(id).inner.lock().table.contains_key(&id)
    }

    /// Flush every dirty cached page.
    ///
    /// Pages currently under an exclusive accessor are skipped; they are
    /// flushed by `write_page` or at eviction. Call with no accessors
    /// outstanding for a full flush.
    pub fn flush_all_pages(&self) -> Result<()> {
        for partition in &self.partitions {
            let mut inner = partition.inner.lock();
            let entries: Vec<Arc<CachedPage>> = inner.table.values().map(Arc::clone).collect();
            for entry in entries {
                if !entry.is_dirty() {
                    continue;
                }
                if let Some(page) = entry.page().try_read() {
                    inner.writer.write(entry.id(), &page)?;
                    entry.clear_dirty();
                    self.stats.pages_written.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Public API: introspection
    // ========================================================================

    /// The backing storage.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Number of partitions.
    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Number of pages currently cached across all partitions.
    pub fn cached_page_count(&self) -> usize {
        self.partitions
            .iter()
            .map(|p| p.inner.lock().table.len())
            .sum()
    }

    // ========================================================================
    // Internal: called by accessors on drop
    // ========================================================================

    /// Surrender one pin on `entry`, marking it evictable when the count
    /// reaches zero.
    pub(crate) fn release_page(&self, entry: &Arc<CachedPage>) {
        let partition = self.partition_for(entry.id());
        let mut inner = partition.inner.lock();
        if entry.unpin() == 0 {
            inner.policy.set_evictable(entry.id(), true);
        }
    }

    // ========================================================================
    // Internal: lookup, miss fill, eviction
    // ========================================================================

    fn partition_for(&self, id: PageId) -> &Partition {
        &self.partitions[(id.0 % self.partitions.len() as u64) as usize]
    }

    /// Find `id` in its partition, loading it from storage on a miss.
    /// The returned entry is pinned.
    fn lookup_or_load(&self, id: PageId) -> Result<Arc<CachedPage>> {
        if !id.is_valid() {
            return Err(Error::PageNotFound(id));
        }

        let partition = self.partition_for(id);

        {
            let mut inner = partition.inner.lock();
            if let Some(entry) = inner.table.get(&id).map(Arc::clone) {
                self.pin_entry(&mut inner, &entry);
                self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry);
            }
        }

        // Miss: read and decode without the partition lock, so one slow read
        // doesn't stall unrelated pages of the partition.
        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
        let page = self.read_page_from_storage(id)?;

        let mut inner = partition.inner.lock();
        // Another thread may have loaded the page while we read.
        if let Some(entry) = inner.table.get(&id).map(Arc::clone) {
            self.pin_entry(&mut inner, &entry);
            return Ok(entry);
        }
        self.insert_entry(&mut inner, id, page, false)
    }

    /// Pin an already-cached entry and record the access.
    fn pin_entry(&self, inner: &mut PartitionInner, entry: &Arc<CachedPage>) {
        if entry.pin() == 1 {
            inner.policy.set_evictable(entry.id(), false);
        }
        inner.policy.update(entry.id());
    }

    /// Insert a page into the partition table (evicting if full), register
    /// it with the policy, and hand it back pinned.
    fn insert_entry(
        &self,
        inner: &mut PartitionInner,
        id: PageId,
        page: Page,
        dirty: bool,
    ) -> Result<Arc<CachedPage>> {
        if inner.table.len() >= self.partition_capacity {
            self.evict_one(inner, id)?;
        }

        let entry = Arc::new(CachedPage::new(id, page, dirty));
        inner.table.insert(id, Arc::clone(&entry));
        inner.policy.add(id);
        entry.pin();
        Ok(entry)
    }

    /// Evict one page from the partition, flushing it first if dirty.
    ///
    /// `hint` is the page about to be inserted; it is never the victim.
    fn evict_one(&self, inner: &mut PartitionInner, hint: PageId) -> Result<()> {
        let victim_id = inner.policy.next(hint).ok_or(Error::CacheExhausted)?;
        let victim = match inner.table.get(&victim_id) {
            Some(entry) if !entry.is_pinned() => Arc::clone(entry),
            // The policy named a pinned or unknown page; bookkeeping is
            // driven under this lock, so this indicates a broken policy.
            _ => return Err(Error::CacheExhausted),
        };

        if victim.is_dirty() {
            // Accessors pin, so an unpinned page's lock is free.
            let page = victim
                .page()
                .try_read()
                .ok_or(Error::CacheExhausted)?;
            inner.writer.write(victim_id, &page)?;
            drop(page);
            victim.clear_dirty();
            self.stats.pages_written.fetch_add(1, Ordering::Relaxed);
        }

        inner.table.remove(&victim_id);
        inner.policy.remove(victim_id);
        self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn read_page_from_storage(&self, id: PageId) -> Result<Page> {
        let size = self.storage.size()?;
        let end = id.offset() + PAGE_SIZE as u64;
        if end > size {
            return Err(Error::PageNotFound(id));
        }

        let mut block = vec![0u8; PAGE_SIZE];
        self.storage.read(&mut block, id.offset())?;
        self.stats.pages_read.fetch_add(1, Ordering::Relaxed);
        Page::decode(&block)
    }
}
