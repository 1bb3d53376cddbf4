//! Error types for facetdb.

use thiserror::Error;

use crate::common::PageId;

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in facetdb.
///
/// `EntryNotFound` and `DuplicateEntryKey` are expected outcomes the caller
/// recovers from; the rest are fatal for the operation that raised them.
/// No operation retries internally.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the backing storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested page lies beyond the end of the backing storage.
    #[error("{0} not found")]
    PageNotFound(PageId),

    /// A page read from storage failed to decode.
    #[error("corrupted page: {0}")]
    CorruptedPage(&'static str),

    /// A page's type or content violates a structural invariant of the
    /// store (e.g. a leaf chain link pointing at a non-leaf page).
    #[error("corrupted file: {0}")]
    CorruptedFile(&'static str),

    /// A cache partition is at capacity and every resident page is pinned.
    ///
    /// Returned immediately rather than blocking, so a traversing thread and
    /// an evicting thread in the same partition cannot deadlock.
    #[error("cache exhausted: no evictable page available")]
    CacheExhausted,

    /// Lookup miss.
    #[error("entry not found")]
    EntryNotFound,

    /// Insert of a key that already exists in its collection.
    #[error("duplicate entry key")]
    DuplicateEntryKey,

    /// A key or value too large to ever fit its page kind.
    #[error("entry too large for a single page")]
    EntryTooLarge,
}
