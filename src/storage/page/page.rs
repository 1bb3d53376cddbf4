//! The page: facetdb's fixed-size unit of storage and caching.
//!
//! A [`Page`] is a tagged variant over the five page kinds. Its canonical
//! binary form is exactly [`PAGE_SIZE`] bytes:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       1     page type tag
//! 1       4     CRC32 checksum (big-endian)
//! 5       ...   variant payload
//! ...     ...   zero padding up to PAGE_SIZE
//! ```
//!
//! The checksum covers the whole block with the checksum field itself
//! zeroed, so verification needs no special casing.

use crate::codec::{ByteReader, ByteWriter};
use crate::common::config::PAGE_SIZE;
use crate::common::{Error, Result};
use crate::storage::page::data::DataPage;
use crate::storage::page::meta::{FreeListPage, RootsPage};
use crate::storage::page::node::{InternalNodePage, LeafNodePage};

/// Bytes taken by the type tag and checksum at the front of every page.
pub(crate) const PAGE_HEADER_SIZE: usize = 5;

const CHECKSUM_OFFSET: usize = 1;

/// Discriminates the five page kinds.
///
/// Uses `#[repr(u8)]` to pin the on-storage tag values.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    /// ROOTS chain page: collection id -> root node associations.
    Roots = 1,
    /// FREE_LIST chain page: DATA pages with spare capacity.
    FreeList = 2,
    /// Non-leaf B-tree node.
    InternalNode = 3,
    /// Leaf B-tree node.
    LeafNode = 4,
    /// Opaque value container.
    Data = 5,
}

impl PageType {
    /// Convert from the on-storage tag, `None` for unrecognized values.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(PageType::Roots),
            2 => Some(PageType::FreeList),
            3 => Some(PageType::InternalNode),
            4 => Some(PageType::LeafNode),
            5 => Some(PageType::Data),
            _ => None,
        }
    }
}

/// A page of the store, decoded into its variant.
///
/// Mutations that would push the serialized size past [`PAGE_SIZE`] are
/// programming errors: each `insert_*`/`set_*` operation has a matching
/// `can_*` predicate the caller must consult first. Structural growth
/// (splitting) is the storage engine's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page {
    Roots(RootsPage),
    FreeList(FreeListPage),
    InternalNode(InternalNodePage),
    LeafNode(LeafNodePage),
    Data(DataPage),
}

impl Page {
    /// Create an empty page of the given type.
    pub fn new(page_type: PageType) -> Self {
        match page_type {
            PageType::Roots => Page::Roots(RootsPage::new()),
            PageType::FreeList => Page::FreeList(FreeListPage::new()),
            PageType::InternalNode => Page::InternalNode(InternalNodePage::new()),
            PageType::LeafNode => Page::LeafNode(LeafNodePage::new()),
            PageType::Data => Page::Data(DataPage::new()),
        }
    }

    pub fn page_type(&self) -> PageType {
        match self {
            Page::Roots(_) => PageType::Roots,
            Page::FreeList(_) => PageType::FreeList,
            Page::InternalNode(_) => PageType::InternalNode,
            Page::LeafNode(_) => PageType::LeafNode,
            Page::Data(_) => PageType::Data,
        }
    }

    /// Serialized size of the current contents, padding excluded.
    pub fn encoded_size(&self) -> usize {
        match self {
            Page::Roots(p) => p.encoded_size(),
            Page::FreeList(p) => p.encoded_size(),
            Page::InternalNode(p) => p.encoded_size(),
            Page::LeafNode(p) => p.encoded_size(),
            Page::Data(p) => p.encoded_size(),
        }
    }

    /// Encode into the canonical fixed-size block.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(PAGE_SIZE);
        writer.write_u8(self.page_type() as u8);
        writer.write_u32(0); // checksum, patched below
        match self {
            Page::Roots(p) => p.encode_payload(&mut writer),
            Page::FreeList(p) => p.encode_payload(&mut writer),
            Page::InternalNode(p) => p.encode_payload(&mut writer),
            Page::LeafNode(p) => p.encode_payload(&mut writer),
            Page::Data(p) => p.encode_payload(&mut writer),
        }
        writer.pad_to(PAGE_SIZE);

        let mut block = writer.into_inner();
        let checksum = Self::compute_checksum(&block);
        block[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_be_bytes());
        block
    }

    /// Decode the canonical fixed-size block.
    ///
    /// Fails with [`Error::CorruptedPage`] if the block has the wrong length,
    /// the checksum doesn't match, the type tag is unrecognized, or the
    /// payload is truncated.
    pub fn decode(block: &[u8]) -> Result<Page> {
        if block.len() != PAGE_SIZE {
            return Err(Error::CorruptedPage("block is not page-sized"));
        }

        let stored = u32::from_be_bytes([
            block[CHECKSUM_OFFSET],
            block[CHECKSUM_OFFSET + 1],
            block[CHECKSUM_OFFSET + 2],
            block[CHECKSUM_OFFSET + 3],
        ]);
        if stored != Self::compute_checksum(block) {
            return Err(Error::CorruptedPage("checksum mismatch"));
        }

        let mut reader = ByteReader::new(block);
        let tag = reader.read_u8()?;
        let page_type =
            PageType::from_u8(tag).ok_or(Error::CorruptedPage("unrecognized page type"))?;
        reader.read_u32()?; // checksum, already verified

        let page = match page_type {
            PageType::Roots => Page::Roots(RootsPage::decode_payload(&mut reader)?),
            PageType::FreeList => Page::FreeList(FreeListPage::decode_payload(&mut reader)?),
            PageType::InternalNode => {
                Page::InternalNode(InternalNodePage::decode_payload(&mut reader)?)
            }
            PageType::LeafNode => Page::LeafNode(LeafNodePage::decode_payload(&mut reader)?),
            PageType::Data => Page::Data(DataPage::decode_payload(&mut reader)?),
        };
        Ok(page)
    }

    /// CRC32 of a page block with the checksum field zeroed out.
    fn compute_checksum(block: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&block[..CHECKSUM_OFFSET]);
        hasher.update(&[0u8; 4]);
        hasher.update(&block[CHECKSUM_OFFSET + 4..]);
        hasher.finalize()
    }

    // ========================================================================
    // Typed access
    //
    // Traversal code expects specific variants; anything else means the
    // store's page graph is inconsistent.
    // ========================================================================

    pub fn as_roots(&self) -> Result<&RootsPage> {
        match self {
            Page::Roots(p) => Ok(p),
            _ => Err(Error::CorruptedFile("expected a roots page")),
        }
    }

    pub fn as_roots_mut(&mut self) -> Result<&mut RootsPage> {
        match self {
            Page::Roots(p) => Ok(p),
            _ => Err(Error::CorruptedFile("expected a roots page")),
        }
    }

    pub fn as_free_list(&self) -> Result<&FreeListPage> {
        match self {
            Page::FreeList(p) => Ok(p),
            _ => Err(Error::CorruptedFile("expected a free list page")),
        }
    }

    pub fn as_free_list_mut(&mut self) -> Result<&mut FreeListPage> {
        match self {
            Page::FreeList(p) => Ok(p),
            _ => Err(Error::CorruptedFile("expected a free list page")),
        }
    }

    pub fn as_internal_node(&self) -> Result<&InternalNodePage> {
        match self {
            Page::InternalNode(p) => Ok(p),
            _ => Err(Error::CorruptedFile("expected an internal node page")),
        }
    }

    pub fn as_internal_node_mut(&mut self) -> Result<&mut InternalNodePage> {
        match self {
            Page::InternalNode(p) => Ok(p),
            _ => Err(Error::CorruptedFile("expected an internal node page")),
        }
    }

    pub fn as_leaf_node(&self) -> Result<&LeafNodePage> {
        match self {
            Page::LeafNode(p) => Ok(p),
            _ => Err(Error::CorruptedFile("expected a leaf node page")),
        }
    }

    pub fn as_leaf_node_mut(&mut self) -> Result<&mut LeafNodePage> {
        match self {
            Page::LeafNode(p) => Ok(p),
            _ => Err(Error::CorruptedFile("expected a leaf node page")),
        }
    }

    pub fn as_data(&self) -> Result<&DataPage> {
        match self {
            Page::Data(p) => Ok(p),
            _ => Err(Error::CorruptedFile("expected a data page")),
        }
    }

    pub fn as_data_mut(&mut self) -> Result<&mut DataPage> {
        match self {
            Page::Data(p) => Ok(p),
            _ => Err(Error::CorruptedFile("expected a data page")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PageId;
    use crate::storage::page::node::lexicographic;

    #[test]
    fn test_encode_is_page_sized() {
        for page_type in [
            PageType::Roots,
            PageType::FreeList,
            PageType::InternalNode,
            PageType::LeafNode,
            PageType::Data,
        ] {
            let block = Page::new(page_type).encode();
            assert_eq!(block.len(), PAGE_SIZE);
            assert_eq!(block[0], page_type as u8);
        }
    }

    #[test]
    fn test_roundtrip_empty_variants() {
        for page_type in [
            PageType::Roots,
            PageType::FreeList,
            PageType::InternalNode,
            PageType::LeafNode,
            PageType::Data,
        ] {
            let page = Page::new(page_type);
            let decoded = Page::decode(&page.encode()).unwrap();
            assert_eq!(page, decoded);
        }
    }

    #[test]
    fn test_roundtrip_populated_pages() {
        let mut page = Page::new(PageType::Roots);
        let roots = page.as_roots_mut().unwrap();
        roots.set_root_node_id(b"users", PageId::new(3));
        roots.set_root_node_id(b"orders", PageId::new(9));
        roots.set_next_roots_page(PageId::new(17));
        assert_eq!(Page::decode(&page.encode()).unwrap(), page);

        let mut page = Page::new(PageType::LeafNode);
        let leaf = page.as_leaf_node_mut().unwrap();
        leaf.insert_entry(b"alice", PageId::new(4), 0, lexicographic);
        leaf.insert_entry(b"bob", PageId::new(4), 1, lexicographic);
        leaf.set_next_leaf_node_page(PageId::new(12));
        assert_eq!(Page::decode(&page.encode()).unwrap(), page);

        let mut page = Page::new(PageType::Data);
        let data = page.as_data_mut().unwrap();
        data.insert_entry(b"value one");
        data.insert_entry(&[]);
        data.insert_entry(&[0xFF; 1000]);
        assert_eq!(Page::decode(&page.encode()).unwrap(), page);
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        assert!(matches!(
            Page::decode(&[0u8; 100]),
            Err(Error::CorruptedPage(_))
        ));
    }

    #[test]
    fn test_decode_rejects_bit_flip() {
        let mut block = Page::new(PageType::LeafNode).encode();
        block[PAGE_SIZE / 2] ^= 0x01;
        assert!(matches!(
            Page::decode(&block),
            Err(Error::CorruptedPage("checksum mismatch"))
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        let mut block = Page::new(PageType::Data).encode();
        block[0] = 0xEE;
        // Re-stamp the checksum so only the tag is at fault.
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&block[..1]);
        hasher.update(&[0u8; 4]);
        hasher.update(&block[5..]);
        let checksum = hasher.finalize();
        block[1..5].copy_from_slice(&checksum.to_be_bytes());

        assert!(matches!(
            Page::decode(&block),
            Err(Error::CorruptedPage("unrecognized page type"))
        ));
    }

    #[test]
    fn test_typed_access_mismatch() {
        let page = Page::new(PageType::Data);
        assert!(matches!(
            page.as_leaf_node(),
            Err(Error::CorruptedFile(_))
        ));
        assert!(page.as_data().is_ok());
    }
}
