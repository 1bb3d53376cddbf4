//! Forward cursor over one collection's leaf chain.

use crate::buffer::{PartitionedPageManager, SharedPageAccessor};
use crate::common::{Error, Result};

/// Iterates a collection's entries in key order.
///
/// The cursor holds a SHARED accessor on exactly one leaf at a time - it
/// never holds two leaves' locks simultaneously, so concurrent inserts into
/// other leaves proceed unhindered.
///
/// # Example
/// ```ignore
/// let mut iter = engine.get_iterator(b"users")?;
/// while !iter.end() {
///     let key = iter.key().unwrap().to_vec();
///     let val = iter.val()?;
///     iter.next()?;
/// }
/// ```
pub struct EntryIterator<'a> {
    manager: &'a PartitionedPageManager,
    cursor: Option<Cursor<'a>>,
}

struct Cursor<'a> {
    page: SharedPageAccessor<'a>,
    index: usize,
}

impl<'a> EntryIterator<'a> {
    pub(crate) fn new(
        manager: &'a PartitionedPageManager,
        leaf: SharedPageAccessor<'a>,
    ) -> Result<Self> {
        leaf.as_leaf_node()?;
        let mut iter = Self {
            manager,
            cursor: Some(Cursor {
                page: leaf,
                index: 0,
            }),
        };
        iter.normalize()?;
        Ok(iter)
    }

    /// Whether the cursor has run off the end of the collection.
    pub fn end(&self) -> bool {
        self.cursor.is_none()
    }

    /// Key at the cursor, `None` once exhausted.
    pub fn key(&self) -> Option<&[u8]> {
        let cursor = self.cursor.as_ref()?;
        cursor
            .page
            .as_leaf_node()
            .ok()?
            .entry(cursor.index)
            .map(|e| e.key())
    }

    /// Value at the cursor, resolved through its DATA page.
    ///
    /// # Errors
    /// `EntryNotFound` once the iterator is exhausted.
    pub fn val(&self) -> Result<Vec<u8>> {
        let cursor = self.cursor.as_ref().ok_or(Error::EntryNotFound)?;
        let entry = cursor
            .page
            .as_leaf_node()?
            .entry(cursor.index)
            .ok_or(Error::EntryNotFound)?;
        let (data_page_id, data_index) = (entry.data_page_id(), entry.data_index());

        let data_page = self.manager.get_page_shared(data_page_id)?;
        let value = data_page
            .as_data()?
            .entry(data_index)
            .ok_or(Error::CorruptedFile("leaf entry points past its data page"))?;
        Ok(value.to_vec())
    }

    /// Advance to the next entry, following the leaf chain as needed.
    pub fn next(&mut self) -> Result<()> {
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.index += 1;
        }
        self.normalize()
    }

    /// Skip past exhausted leaves until an entry or the end of the chain.
    fn normalize(&mut self) -> Result<()> {
        loop {
            let Some(cursor) = self.cursor.as_ref() else {
                return Ok(());
            };
            let leaf = cursor.page.as_leaf_node()?;
            if cursor.index < leaf.num_entries() {
                return Ok(());
            }

            let next = leaf.next_leaf_node_page();
            if !next.is_valid() {
                self.cursor = None;
                return Ok(());
            }

            // One leaf at a time: release the current lock before taking
            // the next.
            self.cursor = None;
            let page = self.manager.get_page_shared(next)?;
            page.as_leaf_node()?;
            self.cursor = Some(Cursor { page, index: 0 });
        }
    }
}
