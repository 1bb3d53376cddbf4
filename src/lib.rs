//! facetdb - an embedded key-value storage engine with a partitioned page
//! cache and pluggable eviction policies.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          facetdb                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────┐   │
//! │  │            Storage Engine (engine/)                  │   │
//! │  │   per-collection B-trees · free-list allocation      │   │
//! │  │   count / exists / get / insert / iterate            │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! │                            ↓                                │
//! │  ┌─────────────────────────────────────────────────────┐   │
//! │  │            Page Cache (buffer/)                      │   │
//! │  │  ┌───────────────────────────────────────────────┐   │   │
//! │  │  │ Partitions: table + eviction policy + writer  │   │   │
//! │  │  │        (policies swappable: LRU | FIFO)       │   │   │
//! │  │  └───────────────────────────────────────────────┘   │   │
//! │  │   PartitionedPageManager + accessors + stats         │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! │                            ↓                                │
//! │  ┌─────────────────────────────────────────────────────┐   │
//! │  │            Storage Layer (storage/)                  │   │
//! │  │   Storage trait + FileStorage | MemoryStorage        │   │
//! │  │   Page variants + canonical 8KB binary encoding      │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, Error, config)
//! - [`codec`] - Byte-level serialization helpers
//! - [`storage`] - Backing stores and page formats
//! - [`buffer`] - The partitioned page cache
//! - [`engine`] - The key-value storage engine
//!
//! # Quick Start
//! ```no_run
//! use std::sync::Arc;
//! use facetdb::{
//!     lexicographic, FileStorage, PartitionedPageManager, Storage, StorageEngine,
//! };
//!
//! # fn main() -> facetdb::Result<()> {
//! let storage: Arc<dyn Storage> = Arc::new(FileStorage::open_or_create("my.db")?);
//! let manager = PartitionedPageManager::with_defaults(storage)?;
//! let engine = StorageEngine::new(manager)?;
//!
//! engine.insert(b"users", b"alice", b"1", lexicographic)?;
//! assert_eq!(engine.get(b"users", b"alice", lexicographic)?, b"1");
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod codec;
pub mod common;
pub mod engine;
pub mod storage;

// Re-export commonly used items at crate root for convenience
pub use common::config::{FREE_LIST_PAGE_ID, PAGE_SIZE, ROOTS_PAGE_ID};
pub use common::{Error, PageId, Result};

pub use buffer::{
    CacheStats, CacheStatsSnapshot, ExclusivePageAccessor, PageManagerOptions,
    PartitionedPageManager, SharedPageAccessor,
};
pub use engine::{EntryIterator, StorageEngine};
pub use storage::page::{lexicographic, KeyComparator, Page, PageType};
pub use storage::{FileStorage, MemoryStorage, Storage};
