//! Write-back strategies.
//!
//! A [`PageWriter`] performs the durable persistence of one page's encoded
//! bytes; the manager obtains one instance per partition through a
//! [`PageWriterFactory`] so write-back can be parallelized or mocked.

use std::sync::Arc;

use crate::common::{PageId, Result};
use crate::storage::page::Page;
use crate::storage::Storage;

/// Persists pages to durable storage.
pub trait PageWriter: Send {
    /// Write `page`'s encoded bytes at its canonical offset.
    fn write(&mut self, id: PageId, page: &Page) -> Result<()>;
}

/// Creates one writer instance per cache partition.
pub trait PageWriterFactory: Send + Sync {
    fn create(&self) -> Box<dyn PageWriter>;
}

/// Synchronous write-through to the backing storage.
pub struct SyncPageWriter {
    storage: Arc<dyn Storage>,
}

impl SyncPageWriter {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

impl PageWriter for SyncPageWriter {
    fn write(&mut self, id: PageId, page: &Page) -> Result<()> {
        let block = page.encode();
        self.storage.write(&block, id.offset())
    }
}

/// Produces a [`SyncPageWriter`] per partition, all sharing one storage.
pub struct SyncPageWriterFactory {
    storage: Arc<dyn Storage>,
}

impl SyncPageWriterFactory {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

impl PageWriterFactory for SyncPageWriterFactory {
    fn create(&self) -> Box<dyn PageWriter> {
        Box::new(SyncPageWriter::new(Arc::clone(&self.storage)))
    }
}
