//! Store-metadata page variants: the ROOTS chain and the FREE_LIST chain.

use crate::codec::{ByteReader, ByteWriter};
use crate::common::config::PAGE_SIZE;
use crate::common::{PageId, Result};
use crate::storage::page::page::PAGE_HEADER_SIZE;

/// One (collection id -> root node page) association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootsEntry {
    collection_id: Vec<u8>,
    root_node_id: PageId,
}

impl RootsEntry {
    pub fn collection_id(&self) -> &[u8] {
        &self.collection_id
    }

    pub fn root_node_id(&self) -> PageId {
        self.root_node_id
    }
}

/// A page of the ROOTS chain: maps collection IDs to their B-tree roots.
///
/// The chain starts at the reserved page ID 1 and grows by linking a fresh
/// ROOTS page when the current tail has no room. A collection ID appears in
/// at most one page of the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootsPage {
    entries: Vec<RootsEntry>,
    next_roots_page: PageId,
}

impl RootsPage {
    /// next link (8) + entry count (2).
    const BASE_SIZE: usize = PAGE_HEADER_SIZE + 8 + 2;

    fn entry_size(collection_id: &[u8]) -> usize {
        2 + collection_id.len() + 8
    }

    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_roots_page: PageId::INVALID,
        }
    }

    pub fn encoded_size(&self) -> usize {
        Self::BASE_SIZE
            + self
                .entries
                .iter()
                .map(|e| Self::entry_size(&e.collection_id))
                .sum::<usize>()
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    /// Root node page of `collection_id`, if this page holds its association.
    pub fn root_node_id(&self, collection_id: &[u8]) -> Option<PageId> {
        self.entries
            .iter()
            .find(|e| e.collection_id == collection_id)
            .map(|e| e.root_node_id)
    }

    /// Whether an association for `collection_id` can be recorded here.
    ///
    /// Updating an existing association never changes the page size, so it
    /// is always allowed.
    pub fn can_set_root_node_id(&self, collection_id: &[u8]) -> bool {
        if self.root_node_id(collection_id).is_some() {
            return true;
        }
        self.encoded_size() + Self::entry_size(collection_id) <= PAGE_SIZE
    }

    /// Record or update the association for `collection_id`.
    ///
    /// # Panics
    /// Panics if `can_set_root_node_id` is false; callers must check first.
    pub fn set_root_node_id(&mut self, collection_id: &[u8], root_node_id: PageId) {
        assert!(
            self.can_set_root_node_id(collection_id),
            "roots page capacity exceeded"
        );
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.collection_id == collection_id)
        {
            entry.root_node_id = root_node_id;
            return;
        }
        self.entries.push(RootsEntry {
            collection_id: collection_id.to_vec(),
            root_node_id,
        });
    }

    pub fn next_roots_page(&self) -> PageId {
        self.next_roots_page
    }

    pub fn set_next_roots_page(&mut self, id: PageId) {
        self.next_roots_page = id;
    }

    pub(crate) fn encode_payload(&self, writer: &mut ByteWriter) {
        writer.write_u64(self.next_roots_page.0);
        writer.write_u16(self.entries.len() as u16);
        for entry in &self.entries {
            writer.write_u16(entry.collection_id.len() as u16);
            writer.write_bytes(&entry.collection_id);
            writer.write_u64(entry.root_node_id.0);
        }
    }

    pub(crate) fn decode_payload(reader: &mut ByteReader<'_>) -> Result<Self> {
        let next_roots_page = PageId(reader.read_u64()?);
        let count = reader.read_u16()?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let key_len = reader.read_u16()? as usize;
            let collection_id = reader.read_bytes(key_len)?;
            let root_node_id = PageId(reader.read_u64()?);
            entries.push(RootsEntry {
                collection_id,
                root_node_id,
            });
        }
        Ok(Self {
            entries,
            next_roots_page,
        })
    }
}

/// One free-list record: a DATA page and an estimate of its spare capacity.
///
/// The estimate may run below the page's true free space (an orphaned
/// reservation after a crash) but never above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeListEntry {
    data_page_id: PageId,
    free_space: u16,
}

impl FreeListEntry {
    pub fn data_page_id(&self) -> PageId {
        self.data_page_id
    }

    pub fn free_space(&self) -> u16 {
        self.free_space
    }
}

/// A page of the FREE_LIST chain.
///
/// The chain starts at the reserved page ID 2 and mirrors the lazy growth of
/// the ROOTS chain. Entries with a zero estimate are dropped at reservation
/// time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeListPage {
    entries: Vec<FreeListEntry>,
    next_free_list_page: PageId,
}

impl FreeListPage {
    /// next link (8) + entry count (2).
    const BASE_SIZE: usize = PAGE_HEADER_SIZE + 8 + 2;

    /// data page id (8) + free-space estimate (2).
    const ENTRY_SIZE: usize = 10;

    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_free_list_page: PageId::INVALID,
        }
    }

    pub fn encoded_size(&self) -> usize {
        Self::BASE_SIZE + self.entries.len() * Self::ENTRY_SIZE
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn can_insert_entry(&self) -> bool {
        self.encoded_size() + Self::ENTRY_SIZE <= PAGE_SIZE
    }

    /// Register a DATA page with `free_space` bytes to spare.
    ///
    /// # Panics
    /// Panics if `can_insert_entry` is false; callers must check first.
    pub fn insert_entry(&mut self, data_page_id: PageId, free_space: u16) {
        assert!(self.can_insert_entry(), "free list page capacity exceeded");
        self.entries.push(FreeListEntry {
            data_page_id,
            free_space,
        });
    }

    /// Reserve `required` bytes on some DATA page tracked by this page.
    ///
    /// Scans for the first entry whose estimate covers `required`, decrements
    /// it (dropping the entry when it reaches zero), and returns the DATA
    /// page's ID. Returns `None` when no entry fits, so the caller can
    /// continue along the chain.
    pub fn reserve_entry(&mut self, required: usize) -> Option<PageId> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.free_space as usize >= required)?;
        let id = self.entries[pos].data_page_id;
        self.entries[pos].free_space -= required as u16;
        if self.entries[pos].free_space == 0 {
            self.entries.remove(pos);
        }
        Some(id)
    }

    pub fn next_free_list_page(&self) -> PageId {
        self.next_free_list_page
    }

    pub fn set_next_free_list_page(&mut self, id: PageId) {
        self.next_free_list_page = id;
    }

    pub(crate) fn encode_payload(&self, writer: &mut ByteWriter) {
        writer.write_u64(self.next_free_list_page.0);
        writer.write_u16(self.entries.len() as u16);
        for entry in &self.entries {
            writer.write_u64(entry.data_page_id.0);
            writer.write_u16(entry.free_space);
        }
    }

    pub(crate) fn decode_payload(reader: &mut ByteReader<'_>) -> Result<Self> {
        let next_free_list_page = PageId(reader.read_u64()?);
        let count = reader.read_u16()?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let data_page_id = PageId(reader.read_u64()?);
            let free_space = reader.read_u16()?;
            entries.push(FreeListEntry {
                data_page_id,
                free_space,
            });
        }
        Ok(Self {
            entries,
            next_free_list_page,
        })
    }
}
