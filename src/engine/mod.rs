//! The storage engine: a multi-collection ordered key-value store.
//!
//! Collections are identified by opaque byte IDs; each has its own B-tree
//! whose root is discovered via the ROOTS chain starting at page 1. Values
//! live on DATA pages allocated through the FREE_LIST chain starting at
//! page 2; leaf entries hold (data page, index) indirections to them.
//!
//! Every operation is expressed purely in terms of
//! [`PartitionedPageManager`] accessors and a caller-supplied key
//! comparator. The engine takes SHARED access while descending and switches
//! to EXCLUSIVE only for pages it mutates: free-list pages, leaves being
//! inserted into, roots pages, and split parents.

mod iterator;

use std::cmp::Ordering;

use crate::buffer::{ExclusivePageAccessor, PartitionedPageManager, SharedPageAccessor};
use crate::common::config::{FREE_LIST_PAGE_ID, ROOTS_PAGE_ID};
use crate::common::{Error, PageId, Result};
use crate::storage::page::{DataPage, KeyComparator, LeafNodePage, Page, PageType};

pub use iterator::EntryIterator;

/// Multi-collection ordered key-value store layered on the page cache.
///
/// # Example
/// ```ignore
/// let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
/// let manager = PartitionedPageManager::with_defaults(storage)?;
/// let engine = StorageEngine::new(manager)?;
///
/// engine.insert(b"users", b"alice", b"1", lexicographic)?;
/// assert_eq!(engine.get(b"users", b"alice", lexicographic)?, b"1");
/// ```
pub struct StorageEngine {
    manager: PartitionedPageManager,
}

impl StorageEngine {
    /// Open the store, creating or verifying its reserved pages.
    ///
    /// On an empty storage this creates and persists the ROOTS head (page 1)
    /// and FREE_LIST head (page 2). On an existing storage both are decoded
    /// and type-checked; anything else is `CorruptedFile`.
    pub fn new(manager: PartitionedPageManager) -> Result<Self> {
        if manager.storage().size()? == 0 {
            let roots = manager.create_page(PageType::Roots)?;
            if roots.id() != ROOTS_PAGE_ID {
                return Err(Error::CorruptedFile("roots head allocated at unexpected id"));
            }
            manager.write_page(&roots)?;
            drop(roots);

            let free_list = manager.create_page(PageType::FreeList)?;
            if free_list.id() != FREE_LIST_PAGE_ID {
                return Err(Error::CorruptedFile(
                    "free list head allocated at unexpected id",
                ));
            }
            manager.write_page(&free_list)?;
        } else {
            manager.get_page_shared(ROOTS_PAGE_ID)?.as_roots()?;
            manager.get_page_shared(FREE_LIST_PAGE_ID)?.as_free_list()?;
        }

        Ok(Self { manager })
    }

    /// The underlying page manager.
    pub fn manager(&self) -> &PartitionedPageManager {
        &self.manager
    }

    // ========================================================================
    // Public API
    // ========================================================================

    /// Number of entries in `collection_id`.
    ///
    /// Descends to the leftmost leaf and sums entry counts along the leaf
    /// chain. A collection that was never written counts 0.
    pub fn count(&self, collection_id: &[u8]) -> Result<u64> {
        let Some(root_id) = self.get_root_node_id(collection_id)? else {
            return Ok(0);
        };

        let mut count = 0u64;
        let mut page_id = root_id;
        while page_id.is_valid() {
            let page = self.manager.get_page_shared(page_id)?;
            page_id = match &*page {
                Page::InternalNode(node) => {
                    node.entry(0)
                        .ok_or(Error::CorruptedFile("internal node has no entries"))?
                        .child_id()
                }
                Page::LeafNode(node) => {
                    count += node.num_entries() as u64;
                    node.next_leaf_node_page()
                }
                _ => return Err(Error::CorruptedFile("unexpected page type in tree descent")),
            };
        }
        Ok(count)
    }

    /// Whether `key` exists in `collection_id`.
    pub fn exists(&self, collection_id: &[u8], key: &[u8], cmp: KeyComparator) -> Result<bool> {
        let leaf = self.get_leaf_page(collection_id, key, cmp)?;
        Ok(leaf.as_leaf_node()?.find_entry(key, cmp).is_some())
    }

    /// Fetch the value stored under `key` in `collection_id`.
    ///
    /// # Errors
    /// `EntryNotFound` on a lookup miss.
    pub fn get(&self, collection_id: &[u8], key: &[u8], cmp: KeyComparator) -> Result<Vec<u8>> {
        let leaf = self.get_leaf_page(collection_id, key, cmp)?;
        let node = leaf.as_leaf_node()?;
        let entry = node.find_entry(key, cmp).ok_or(Error::EntryNotFound)?;
        let (data_page_id, data_index) = (entry.data_page_id(), entry.data_index());

        let data_page = self.manager.get_page_shared(data_page_id)?;
        let value = data_page
            .as_data()?
            .entry(data_index)
            .ok_or(Error::CorruptedFile("leaf entry points past its data page"))?;
        Ok(value.to_vec())
    }

    /// Insert `key` -> `value` into `collection_id`.
    ///
    /// Allocates room for the value via the free-list protocol, then records
    /// the key in its leaf, splitting the leaf (and any full ancestors) when
    /// it overflows.
    ///
    /// # Errors
    /// - `DuplicateEntryKey` if the key is already present; the store is
    ///   unchanged
    /// - `EntryTooLarge` if the key or value can never fit its page kind
    pub fn insert(
        &self,
        collection_id: &[u8],
        key: &[u8],
        value: &[u8],
        cmp: KeyComparator,
    ) -> Result<()> {
        if !LeafNodePage::key_fits(key) || !DataPage::value_fits(value) {
            return Err(Error::EntryTooLarge);
        }

        let (leaf_id, path) = self.find_leaf_path(collection_id, key, cmp)?;
        let mut leaf = self.manager.get_page_exclusive(leaf_id)?;
        if leaf.as_leaf_node()?.find_entry(key, cmp).is_some() {
            return Err(Error::DuplicateEntryKey);
        }

        let (data_page_id, data_index) = {
            let mut data_page = self.get_free_data_page(value)?;
            let index = data_page.as_data_mut()?.insert_entry(value);
            self.manager.write_page(&data_page)?;
            (data_page.id(), index)
        };

        if leaf.as_leaf_node()?.can_insert_entry(key) {
            leaf.as_leaf_node_mut()?
                .insert_entry(key, data_page_id, data_index, cmp);
            self.manager.write_page(&leaf)?;
            return Ok(());
        }

        self.split_leaf_and_insert(collection_id, leaf, &path, key, data_page_id, data_index, cmp)
    }

    /// A forward cursor over `collection_id`, positioned at its first entry.
    ///
    /// A collection that was never written gets an empty root leaf created,
    /// and the cursor starts (and ends) there.
    pub fn get_iterator(&self, collection_id: &[u8]) -> Result<EntryIterator<'_>> {
        let leaf_id = match self.get_root_node_id(collection_id)? {
            None => self.create_root_node_page(collection_id)?,
            Some(root_id) => {
                let mut page_id = root_id;
                loop {
                    let page = self.manager.get_page_shared(page_id)?;
                    match &*page {
                        Page::InternalNode(node) => {
                            page_id = node
                                .entry(0)
                                .ok_or(Error::CorruptedFile("internal node has no entries"))?
                                .child_id();
                        }
                        Page::LeafNode(_) => break page_id,
                        _ => {
                            return Err(Error::CorruptedFile(
                                "unexpected page type in tree descent",
                            ))
                        }
                    }
                }
            }
        };

        let leaf = self.manager.get_page_shared(leaf_id)?;
        EntryIterator::new(&self.manager, leaf)
    }

    // ========================================================================
    // Internal: root discovery and creation (ROOTS chain)
    // ========================================================================

    /// Walk the ROOTS chain for `collection_id`'s root node.
    fn get_root_node_id(&self, collection_id: &[u8]) -> Result<Option<PageId>> {
        let mut page_id = ROOTS_PAGE_ID;
        while page_id.is_valid() {
            let page = self.manager.get_page_shared(page_id)?;
            let roots = page.as_roots()?;
            if let Some(root_id) = roots.root_node_id(collection_id) {
                return Ok(Some(root_id));
            }
            page_id = roots.next_roots_page();
        }
        Ok(None)
    }

    /// Create an empty root leaf for `collection_id` and record it in the
    /// ROOTS chain, appending a new ROOTS page if the chain is full.
    ///
    /// Returns the new leaf's ID; this is how a collection is lazily
    /// created on first touch.
    fn create_root_node_page(&self, collection_id: &[u8]) -> Result<PageId> {
        let mut page_id = ROOTS_PAGE_ID;
        loop {
            let mut page = self.manager.get_page_exclusive(page_id)?;
            let next = page.as_roots()?.next_roots_page();
            if next.is_valid() {
                page_id = next;
                continue;
            }

            let leaf = self.manager.create_page(PageType::LeafNode)?;
            let leaf_id = leaf.id();
            self.manager.write_page(&leaf)?;
            drop(leaf);

            if page.as_roots()?.can_set_root_node_id(collection_id) {
                page.as_roots_mut()?.set_root_node_id(collection_id, leaf_id);
                self.manager.write_page(&page)?;
            } else {
                let mut new_roots = self.manager.create_page(PageType::Roots)?;
                new_roots
                    .as_roots_mut()?
                    .set_root_node_id(collection_id, leaf_id);
                page.as_roots_mut()?.set_next_roots_page(new_roots.id());
                self.manager.write_page(&new_roots)?;
                self.manager.write_page(&page)?;
            }

            return Ok(leaf_id);
        }
    }

    /// Repoint `collection_id`'s association after a root split.
    fn update_root_node_id(&self, collection_id: &[u8], new_root: PageId) -> Result<()> {
        let mut page_id = ROOTS_PAGE_ID;
        while page_id.is_valid() {
            let mut page = self.manager.get_page_exclusive(page_id)?;
            if page.as_roots()?.root_node_id(collection_id).is_some() {
                page.as_roots_mut()?.set_root_node_id(collection_id, new_root);
                self.manager.write_page(&page)?;
                return Ok(());
            }
            page_id = page.as_roots()?.next_roots_page();
        }
        Err(Error::CorruptedFile("collection missing from roots chain"))
    }

    // ========================================================================
    // Internal: tree descent
    // ========================================================================

    /// Descend to the leaf responsible for `key` under SHARED access.
    fn get_leaf_page(
        &self,
        collection_id: &[u8],
        key: &[u8],
        cmp: KeyComparator,
    ) -> Result<SharedPageAccessor<'_>> {
        let root_id = match self.get_root_node_id(collection_id)? {
            Some(id) => id,
            None => {
                let leaf_id = self.create_root_node_page(collection_id)?;
                return self.manager.get_page_shared(leaf_id);
            }
        };

        let mut page_id = root_id;
        loop {
            let page = self.manager.get_page_shared(page_id)?;
            let child = match &*page {
                Page::InternalNode(node) => {
                    let entry = node
                        .entry(node.search(key, cmp))
                        .ok_or(Error::CorruptedFile("internal node has no entries"))?;
                    Some(entry.child_id())
                }
                Page::LeafNode(_) => None,
                _ => return Err(Error::CorruptedFile("unexpected page type in tree descent")),
            };
            match child {
                Some(child_id) => page_id = child_id,
                None => return Ok(page),
            }
        }
    }

    /// Like [`get_leaf_page`](Self::get_leaf_page), but returns the leaf's
    /// ID plus the internal-node path walked to reach it, for split
    /// promotion.
    fn find_leaf_path(
        &self,
        collection_id: &[u8],
        key: &[u8],
        cmp: KeyComparator,
    ) -> Result<(PageId, Vec<PageId>)> {
        let root_id = match self.get_root_node_id(collection_id)? {
            Some(id) => id,
            None => return Ok((self.create_root_node_page(collection_id)?, Vec::new())),
        };

        let mut path = Vec::new();
        let mut page_id = root_id;
        loop {
            let page = self.manager.get_page_shared(page_id)?;
            let child = match &*page {
                Page::InternalNode(node) => {
                    let entry = node
                        .entry(node.search(key, cmp))
                        .ok_or(Error::CorruptedFile("internal node has no entries"))?;
                    Some(entry.child_id())
                }
                Page::LeafNode(_) => None,
                _ => return Err(Error::CorruptedFile("unexpected page type in tree descent")),
            };
            match child {
                Some(child_id) => {
                    path.push(page_id);
                    page_id = child_id;
                }
                None => return Ok((page_id, path)),
            }
        }
    }

    // ========================================================================
    // Internal: value allocation (FREE_LIST chain)
    // ========================================================================

    /// Reserve room for `value` on a DATA page, returning it under
    /// EXCLUSIVE access so the insert is consistent with the reservation.
    ///
    /// Scans the FREE_LIST chain for a page with a fitting estimate; at the
    /// end of the chain, allocates a fresh DATA page and registers whatever
    /// capacity remains after this reservation, growing the chain itself
    /// when the tail page is full.
    fn get_free_data_page(&self, value: &[u8]) -> Result<ExclusivePageAccessor<'_>> {
        let required = DataPage::entry_size(value);
        let mut page_id = FREE_LIST_PAGE_ID;
        loop {
            let mut page = self.manager.get_page_exclusive(page_id)?;

            if let Some(data_page_id) = page.as_free_list_mut()?.reserve_entry(required) {
                self.manager.write_page(&page)?;
                let data_page = self.manager.get_page_exclusive(data_page_id)?;
                data_page.as_data()?;
                return Ok(data_page);
            }

            let next = page.as_free_list()?.next_free_list_page();
            if next.is_valid() {
                page_id = next;
                continue;
            }

            // End of the chain: nothing fits. Allocate a fresh DATA page and
            // track what will remain of it once this reservation lands.
            let data_page = self.manager.create_page(PageType::Data)?;
            let remaining = data_page.as_data()?.remaining_space() - required;
            if remaining > 0 {
                if page.as_free_list()?.can_insert_entry() {
                    page.as_free_list_mut()?
                        .insert_entry(data_page.id(), remaining as u16);
                } else {
                    let mut new_page = self.manager.create_page(PageType::FreeList)?;
                    new_page
                        .as_free_list_mut()?
                        .insert_entry(data_page.id(), remaining as u16);
                    page.as_free_list_mut()?
                        .set_next_free_list_page(new_page.id());
                    self.manager.write_page(&new_page)?;
                }
                self.manager.write_page(&page)?;
            }
            return Ok(data_page);
        }
    }

    // ========================================================================
    // Internal: structural growth
    // ========================================================================

    /// Split a full leaf, insert the pending entry into the correct half,
    /// and promote the separator into the ancestors.
    #[allow(clippy::too_many_arguments)]
    fn split_leaf_and_insert(
        &self,
        collection_id: &[u8],
        mut leaf: ExclusivePageAccessor<'_>,
        path: &[PageId],
        key: &[u8],
        data_page_id: PageId,
        data_index: u32,
        cmp: KeyComparator,
    ) -> Result<()> {
        let mut right = self.manager.create_page(PageType::LeafNode)?;
        let left_id = leaf.id();
        let right_id = right.id();

        let separator;
        let left_first_key;
        {
            let left_node = leaf.as_leaf_node_mut()?;
            let right_node = right.as_leaf_node_mut()?;

            let moved = left_node.split_off_upper_half();
            right_node.adopt_entries(moved);
            right_node.set_next_leaf_node_page(left_node.next_leaf_node_page());
            left_node.set_next_leaf_node_page(right_id);

            separator = right_node
                .first_key()
                .ok_or(Error::CorruptedFile("leaf split produced an empty sibling"))?
                .to_vec();
            left_first_key = left_node
                .first_key()
                .ok_or(Error::CorruptedFile("leaf split emptied the node"))?
                .to_vec();
        }

        if cmp(key, &separator) == Ordering::Less {
            leaf.as_leaf_node_mut()?
                .insert_entry(key, data_page_id, data_index, cmp);
        } else {
            right
                .as_leaf_node_mut()?
                .insert_entry(key, data_page_id, data_index, cmp);
        }

        self.manager.write_page(&leaf)?;
        self.manager.write_page(&right)?;

        // Release both leaves before touching ancestors: the engine never
        // holds a lower-level lock while waiting on a higher-level one.
        drop(leaf);
        drop(right);

        self.promote(collection_id, path, left_id, left_first_key, separator, right_id, cmp)
    }

    /// Record a split in the parent chain: insert `(separator, right_id)`
    /// beside `left_id`, splitting full parents as needed, and grow a new
    /// root when the split reaches the top.
    #[allow(clippy::too_many_arguments)]
    fn promote(
        &self,
        collection_id: &[u8],
        path: &[PageId],
        mut left_id: PageId,
        mut left_first_key: Vec<u8>,
        mut separator: Vec<u8>,
        mut right_id: PageId,
        cmp: KeyComparator,
    ) -> Result<()> {
        let mut depth = path.len();
        loop {
            if depth == 0 {
                // The split page was the root: grow the tree by one level.
                let mut new_root = self.manager.create_page(PageType::InternalNode)?;
                {
                    let node = new_root.as_internal_node_mut()?;
                    node.push_entry(&left_first_key, left_id);
                    node.push_entry(&separator, right_id);
                }
                self.manager.write_page(&new_root)?;
                let new_root_id = new_root.id();
                drop(new_root);

                return self.update_root_node_id(collection_id, new_root_id);
            }

            depth -= 1;
            let parent_id = path[depth];
            let mut parent = self.manager.get_page_exclusive(parent_id)?;

            if parent.as_internal_node()?.can_insert_entry(&separator) {
                parent
                    .as_internal_node_mut()?
                    .insert_entry(&separator, right_id, cmp);
                self.manager.write_page(&parent)?;
                return Ok(());
            }

            // Parent is full: split it and carry the promotion up a level.
            let mut sibling = self.manager.create_page(PageType::InternalNode)?;
            let sibling_id = sibling.id();
            {
                let left_node = parent.as_internal_node_mut()?;
                let moved = left_node.split_off_upper_half();
                sibling.as_internal_node_mut()?.adopt_entries(moved);
            }
            let parent_separator = sibling
                .as_internal_node()?
                .first_key()
                .ok_or(Error::CorruptedFile(
                    "internal split produced an empty sibling",
                ))?
                .to_vec();

            if cmp(&separator, &parent_separator) == Ordering::Less {
                parent
                    .as_internal_node_mut()?
                    .insert_entry(&separator, right_id, cmp);
            } else {
                sibling
                    .as_internal_node_mut()?
                    .insert_entry(&separator, right_id, cmp);
            }
            let parent_first_key = parent
                .as_internal_node()?
                .first_key()
                .ok_or(Error::CorruptedFile("internal split emptied the node"))?
                .to_vec();

            self.manager.write_page(&parent)?;
            self.manager.write_page(&sibling)?;
            drop(parent);
            drop(sibling);

            left_id = parent_id;
            left_first_key = parent_first_key;
            separator = parent_separator;
            right_id = sibling_id;
        }
    }
}
