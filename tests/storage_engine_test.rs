//! Storage engine tests.
//!
//! End-to-end coverage of the key-value surface: collection bootstrap,
//! insert/get/exists/count, duplicate rejection, iteration, B-tree growth
//! through leaf and internal splits, and persistence across reopen.

use std::cmp::Ordering;
use std::sync::Arc;
use std::thread;

use facetdb::{
    lexicographic, Error, FileStorage, MemoryStorage, Page, PartitionedPageManager, PageType,
    Storage, StorageEngine, FREE_LIST_PAGE_ID, PAGE_SIZE, ROOTS_PAGE_ID,
};
use tempfile::tempdir;

fn create_engine() -> StorageEngine {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let manager = PartitionedPageManager::with_defaults(storage).unwrap();
    StorageEngine::new(manager).unwrap()
}

/// A fresh store serves its first collection.
#[test]
fn test_first_insert_and_get() {
    let engine = create_engine();

    engine
        .insert(b"users", b"alice", b"1", lexicographic)
        .unwrap();

    assert_eq!(engine.get(b"users", b"alice", lexicographic).unwrap(), b"1");
    assert!(!engine.exists(b"users", b"bob", lexicographic).unwrap());
    assert_eq!(engine.count(b"users").unwrap(), 1);
}

/// Opening a store reserves pages 1 and 2 for the ROOTS and FREE_LIST
/// chains.
#[test]
fn test_bootstrap_reserves_pages() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let manager = PartitionedPageManager::with_defaults(Arc::clone(&storage)).unwrap();
    let _engine = StorageEngine::new(manager).unwrap();

    let mut block = vec![0u8; PAGE_SIZE];
    storage.read(&mut block, ROOTS_PAGE_ID.offset()).unwrap();
    assert_eq!(
        Page::decode(&block).unwrap().page_type(),
        PageType::Roots
    );

    storage.read(&mut block, FREE_LIST_PAGE_ID.offset()).unwrap();
    assert_eq!(
        Page::decode(&block).unwrap().page_type(),
        PageType::FreeList
    );
}

/// Opening a store whose reserved pages carry the wrong type fails.
#[test]
fn test_open_rejects_misreserved_pages() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    storage
        .write(
            &Page::new(PageType::LeafNode).encode(),
            ROOTS_PAGE_ID.offset(),
        )
        .unwrap();
    storage
        .write(
            &Page::new(PageType::FreeList).encode(),
            FREE_LIST_PAGE_ID.offset(),
        )
        .unwrap();

    let manager = PartitionedPageManager::with_defaults(storage).unwrap();
    assert!(matches!(
        StorageEngine::new(manager),
        Err(Error::CorruptedFile(_))
    ));
}

/// Insert-then-get holds for many distinct keys.
#[test]
fn test_insert_get_many() {
    let engine = create_engine();

    for i in 0..100u32 {
        let key = format!("key{:04}", i);
        let val = format!("val{}", i);
        engine
            .insert(b"kv", key.as_bytes(), val.as_bytes(), lexicographic)
            .unwrap();
    }

    for i in 0..100u32 {
        let key = format!("key{:04}", i);
        let val = format!("val{}", i);
        assert_eq!(
            engine.get(b"kv", key.as_bytes(), lexicographic).unwrap(),
            val.as_bytes()
        );
    }
    assert_eq!(engine.count(b"kv").unwrap(), 100);
}

/// A duplicate insert is rejected and leaves the first value untouched.
#[test]
fn test_duplicate_key_rejected() {
    let engine = create_engine();

    engine
        .insert(b"users", b"alice", b"first", lexicographic)
        .unwrap();
    assert!(matches!(
        engine.insert(b"users", b"alice", b"second", lexicographic),
        Err(Error::DuplicateEntryKey)
    ));

    assert_eq!(
        engine.get(b"users", b"alice", lexicographic).unwrap(),
        b"first"
    );
    assert_eq!(engine.count(b"users").unwrap(), 1);
}

/// Lookup misses are reported as such.
#[test]
fn test_get_missing_key() {
    let engine = create_engine();
    engine.insert(b"users", b"alice", b"1", lexicographic).unwrap();

    assert!(matches!(
        engine.get(b"users", b"bob", lexicographic),
        Err(Error::EntryNotFound)
    ));
    // Reading an unknown collection lazily creates its (empty) root.
    assert!(matches!(
        engine.get(b"ghosts", b"casper", lexicographic),
        Err(Error::EntryNotFound)
    ));
}

/// Collections are isolated namespaces.
#[test]
fn test_collections_are_isolated() {
    let engine = create_engine();

    engine.insert(b"a", b"k", b"from-a", lexicographic).unwrap();
    engine.insert(b"b", b"k", b"from-b", lexicographic).unwrap();

    assert_eq!(engine.get(b"a", b"k", lexicographic).unwrap(), b"from-a");
    assert_eq!(engine.get(b"b", b"k", lexicographic).unwrap(), b"from-b");
    assert_eq!(engine.count(b"a").unwrap(), 1);
    assert_eq!(engine.count(b"b").unwrap(), 1);
}

/// Iterating yields exactly the inserted keys, in comparator order.
#[test]
fn test_iterator_yields_all_entries_in_order() {
    let engine = create_engine();

    // Insert out of order.
    let mut keys: Vec<String> = (0..50u32).map(|i| format!("key{:03}", i)).collect();
    keys.reverse();
    for key in &keys {
        engine
            .insert(b"kv", key.as_bytes(), key.to_uppercase().as_bytes(), lexicographic)
            .unwrap();
    }

    let mut iter = engine.get_iterator(b"kv").unwrap();
    let mut seen = Vec::new();
    while !iter.end() {
        let key = String::from_utf8(iter.key().unwrap().to_vec()).unwrap();
        assert_eq!(iter.val().unwrap(), key.to_uppercase().as_bytes());
        seen.push(key);
        iter.next().unwrap();
    }

    keys.sort();
    assert_eq!(seen, keys);
}

/// An iterator over an untouched collection is immediately exhausted.
#[test]
fn test_iterator_empty_collection() {
    let engine = create_engine();

    let iter = engine.get_iterator(b"empty").unwrap();
    assert!(iter.end());
    assert_eq!(iter.key(), None);
    assert!(matches!(iter.val(), Err(Error::EntryNotFound)));
}

/// Enough inserts to overflow leaves: the tree splits, and every key stays
/// reachable through descent, iteration and count.
#[test]
fn test_growth_through_splits() {
    let engine = create_engine();

    // 64-byte keys, ~78 bytes per leaf entry: a leaf holds ~104 entries,
    // so 600 inserts force several leaf splits plus an internal root.
    let key_of = |i: u32| format!("{:060}key", i);
    for i in 0..600u32 {
        engine
            .insert(
                b"big",
                key_of(i).as_bytes(),
                format!("value-{}", i).as_bytes(),
                lexicographic,
            )
            .unwrap();
    }

    assert_eq!(engine.count(b"big").unwrap(), 600);

    for i in (0..600u32).step_by(7) {
        assert_eq!(
            engine.get(b"big", key_of(i).as_bytes(), lexicographic).unwrap(),
            format!("value-{}", i).as_bytes()
        );
    }

    let mut iter = engine.get_iterator(b"big").unwrap();
    let mut seen = 0u64;
    let mut prev: Option<Vec<u8>> = None;
    while !iter.end() {
        let key = iter.key().unwrap().to_vec();
        if let Some(prev) = &prev {
            assert!(prev < &key, "iteration out of order");
        }
        prev = Some(key);
        seen += 1;
        iter.next().unwrap();
    }
    assert_eq!(seen, 600);
}

/// Large keys shrink node fan-out to ~4, so a few hundred inserts push the
/// tree through internal-node splits and multiple root replacements.
#[test]
fn test_deep_growth_through_internal_splits() {
    let engine = create_engine();

    // ~1914 bytes per leaf entry: 4 entries per leaf, 4 per internal node.
    let key_of = |i: u32| format!("{:01900}", i);
    for i in 0..200u32 {
        engine
            .insert(
                b"deep",
                key_of(i).as_bytes(),
                format!("value-{}", i).as_bytes(),
                lexicographic,
            )
            .unwrap();
    }

    assert_eq!(engine.count(b"deep").unwrap(), 200);
    for i in 0..200u32 {
        assert_eq!(
            engine.get(b"deep", key_of(i).as_bytes(), lexicographic).unwrap(),
            format!("value-{}", i).as_bytes()
        );
    }

    let mut iter = engine.get_iterator(b"deep").unwrap();
    let mut seen = 0u32;
    while !iter.end() {
        assert_eq!(iter.key().unwrap(), key_of(seen).as_bytes());
        seen += 1;
        iter.next().unwrap();
    }
    assert_eq!(seen, 200);
}

/// Keys inserted in descending order split toward the left just as well.
#[test]
fn test_growth_with_descending_inserts() {
    let engine = create_engine();

    let key_of = |i: u32| format!("{:060}key", i);
    for i in (0..300u32).rev() {
        engine
            .insert(b"rev", key_of(i).as_bytes(), b"x", lexicographic)
            .unwrap();
    }

    assert_eq!(engine.count(b"rev").unwrap(), 300);
    for i in (0..300u32).step_by(11) {
        assert!(engine.exists(b"rev", key_of(i).as_bytes(), lexicographic).unwrap());
    }
}

/// Small values land on the same DATA page via the free list rather than
/// allocating a new page per insert.
#[test]
fn test_free_list_reuses_data_pages() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let manager = PartitionedPageManager::with_defaults(Arc::clone(&storage)).unwrap();
    let engine = StorageEngine::new(manager).unwrap();

    engine.insert(b"kv", b"a", b"tiny", lexicographic).unwrap();
    let size_after_first = storage.size().unwrap();

    // The second small value must reuse the DATA page allocated above.
    engine.insert(b"kv", b"b", b"tiny2", lexicographic).unwrap();
    assert_eq!(storage.size().unwrap(), size_after_first);
}

/// A custom comparator drives ordering end to end.
#[test]
fn test_custom_comparator() {
    fn reverse(a: &[u8], b: &[u8]) -> Ordering {
        b.cmp(a)
    }

    let engine = create_engine();
    for key in [b"a", b"b", b"c"] {
        engine.insert(b"kv", key, key, reverse).unwrap();
    }

    let mut iter = engine.get_iterator(b"kv").unwrap();
    let mut seen = Vec::new();
    while !iter.end() {
        seen.push(iter.key().unwrap().to_vec());
        iter.next().unwrap();
    }
    assert_eq!(seen, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);

    assert_eq!(engine.get(b"kv", b"b", reverse).unwrap(), b"b");
}

/// Oversized keys and values are rejected up front.
#[test]
fn test_oversized_entries_rejected() {
    let engine = create_engine();

    let huge_key = vec![0xAA; PAGE_SIZE];
    assert!(matches!(
        engine.insert(b"kv", &huge_key, b"v", lexicographic),
        Err(Error::EntryTooLarge)
    ));

    let huge_val = vec![0xBB; PAGE_SIZE];
    assert!(matches!(
        engine.insert(b"kv", b"k", &huge_val, lexicographic),
        Err(Error::EntryTooLarge)
    ));

    assert_eq!(engine.count(b"kv").unwrap(), 0);
}

/// Everything survives closing and reopening a file-backed store.
#[test]
fn test_persistence_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.db");

    {
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::open_or_create(&path).unwrap());
        let manager = PartitionedPageManager::with_defaults(storage).unwrap();
        let engine = StorageEngine::new(manager).unwrap();

        for i in 0..40u32 {
            engine
                .insert(
                    b"kv",
                    format!("key{:03}", i).as_bytes(),
                    format!("val{}", i).as_bytes(),
                    lexicographic,
                )
                .unwrap();
        }
        engine.manager().flush_all_pages().unwrap();
    }

    let storage: Arc<dyn Storage> = Arc::new(FileStorage::open_or_create(&path).unwrap());
    let manager = PartitionedPageManager::with_defaults(storage).unwrap();
    let engine = StorageEngine::new(manager).unwrap();

    assert_eq!(engine.count(b"kv").unwrap(), 40);
    for i in 0..40u32 {
        assert_eq!(
            engine
                .get(b"kv", format!("key{:03}", i).as_bytes(), lexicographic)
                .unwrap(),
            format!("val{}", i).as_bytes()
        );
    }

    // New inserts keep working against the reopened store.
    engine.insert(b"kv", b"key999", b"fresh", lexicographic).unwrap();
    assert_eq!(engine.count(b"kv").unwrap(), 41);
}

/// The engine keeps working when the cache is much smaller than the data,
/// forcing constant eviction and reload.
#[test]
fn test_small_cache_evicts_and_reloads() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let writer_factory = facetdb::buffer::SyncPageWriterFactory::new(Arc::clone(&storage));
    let manager = PartitionedPageManager::new(
        storage,
        &writer_factory,
        &facetdb::buffer::eviction::LruEvictionPolicyFactory,
        facetdb::PageManagerOptions {
            capacity: 16,
            partitions: 2,
        },
    )
    .unwrap();
    let engine = StorageEngine::new(manager).unwrap();

    let key_of = |i: u32| format!("{:040}k", i);
    for i in 0..200u32 {
        engine
            .insert(b"kv", key_of(i).as_bytes(), format!("v{}", i).as_bytes(), lexicographic)
            .unwrap();
    }

    assert!(engine.manager().stats().snapshot().evictions > 0);
    assert_eq!(engine.count(b"kv").unwrap(), 200);
    for i in (0..200u32).step_by(13) {
        assert_eq!(
            engine.get(b"kv", key_of(i).as_bytes(), lexicographic).unwrap(),
            format!("v{}", i).as_bytes()
        );
    }
}

/// Concurrent readers across threads see consistent values.
#[test]
fn test_concurrent_reads() {
    let engine = Arc::new(create_engine());

    for i in 0..50u32 {
        engine
            .insert(
                b"kv",
                format!("key{:03}", i).as_bytes(),
                format!("val{}", i).as_bytes(),
                lexicographic,
            )
            .unwrap();
    }

    let mut handles = vec![];
    for _ in 0..6 {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for _ in 0..20 {
                for i in 0..50u32 {
                    let key = format!("key{:03}", i);
                    assert_eq!(
                        engine.get(b"kv", key.as_bytes(), lexicographic).unwrap(),
                        format!("val{}", i).as_bytes()
                    );
                }
                assert_eq!(engine.count(b"kv").unwrap(), 50);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

/// Writers to disjoint collections make progress concurrently.
#[test]
fn test_concurrent_writers_distinct_collections() {
    let engine = Arc::new(create_engine());

    let mut handles = vec![];
    for c in 0..4u8 {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            let collection = [b'c', c];
            for i in 0..50u32 {
                engine
                    .insert(
                        &collection,
                        format!("key{:03}", i).as_bytes(),
                        b"v",
                        lexicographic,
                    )
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for c in 0..4u8 {
        assert_eq!(engine.count(&[b'c', c]).unwrap(), 50);
    }
}
