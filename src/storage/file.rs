//! File-backed storage.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;

use crate::common::Result;
use crate::storage::Storage;

/// Stores pages in a single database file.
///
/// # Durability
/// Every write is followed by `fsync()`. This is conservative; batching is
/// a caller concern (see the page writer strategy).
pub struct FileStorage {
    file: Mutex<File>,
}

impl FileStorage {
    /// Open an existing database file, or create it if it doesn't exist.
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl Storage for FileStorage {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write(&self, buf: &[u8], offset: u64) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        let file = self.file.lock();
        Ok(file.metadata()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_write_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let storage = FileStorage::open_or_create(&path).unwrap();
        assert_eq!(storage.size().unwrap(), 0);

        storage.write(b"hello", 100).unwrap();
        assert_eq!(storage.size().unwrap(), 105);

        let mut buf = [0u8; 5];
        storage.read(&mut buf, 100).unwrap();
        assert_eq!(&buf, b"hello");

        // The hole before the write reads back as zeros.
        let mut buf = [0xFFu8; 4];
        storage.read(&mut buf, 0).unwrap();
        assert_eq!(buf, [0, 0, 0, 0]);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let storage = FileStorage::open_or_create(&path).unwrap();
            storage.write(b"durable", 0).unwrap();
        }

        let storage = FileStorage::open_or_create(&path).unwrap();
        assert_eq!(storage.size().unwrap(), 7);
        let mut buf = [0u8; 7];
        storage.read(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"durable");
    }

    #[test]
    fn test_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let storage = FileStorage::open_or_create(&path).unwrap();
        let mut buf = [0u8; 4];
        assert!(storage.read(&mut buf, 0).is_err());
    }
}
