use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use magnetite::buffer::buffer_pool_manager::BufferPoolManager;
use magnetite::buffer::lru_k_replacer::LRUKReplacer;
use magnetite::common::config::LRUK_REPLACER_K;
use magnetite::common::logger::initialize_logger;
use magnetite::container::disk_extendible_hash_table::DiskExtendibleHashTable;
use magnetite::container::hash_function::HashFunction;
use magnetite::storage::disk::disk_manager::{DiskIO, FileDiskManager};
use magnetite::storage::page::hash_table_page_defs::htable_bucket_array_size;

struct TestContext {
    bpm: Arc<BufferPoolManager>,
    _temp_dir: TempDir,
}

impl TestContext {
    fn new(name: &str) -> Self {
        initialize_logger();
        const BUFFER_POOL_SIZE: usize = 64;

        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join(format!("{name}.db"));
        let disk_manager: Arc<dyn DiskIO> = Arc::new(FileDiskManager::new(db_path).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(
            BUFFER_POOL_SIZE,
            disk_manager,
            LRUKReplacer::new(BUFFER_POOL_SIZE, LRUK_REPLACER_K),
        ));

        Self {
            bpm,
            _temp_dir: temp_dir,
        }
    }

    fn table(&self, name: &str) -> DiskExtendibleHashTable<u32, u32> {
        DiskExtendibleHashTable::new(name, self.bpm.clone(), HashFunction::new()).unwrap()
    }
}

/// Bucket capacity for (u32, u32) entries; split tests size themselves off it.
fn bucket_capacity() -> usize {
    htable_bucket_array_size(8)
}

fn lookup(ht: &DiskExtendibleHashTable<u32, u32>, key: u32) -> Vec<u32> {
    let mut result = vec![];
    ht.get_value(&key, &mut result).unwrap();
    result
}

#[test]
fn test_empty_get() {
    let ctx = TestContext::new("test_empty_get");
    let ht = ctx.table("empty_get");

    assert!(lookup(&ht, 42).is_empty());
    ht.verify_integrity();
}

#[test]
fn test_simple_put_get() {
    let ctx = TestContext::new("test_simple_put_get");
    let ht = ctx.table("simple_put_get");

    assert!(ht.insert(&7, &700).unwrap());
    assert_eq!(lookup(&ht, 7), vec![700]);
    ht.verify_integrity();
}

#[test]
fn test_duplicate_key_returns_both_values() {
    let ctx = TestContext::new("test_duplicate_key");
    let ht = ctx.table("duplicate_key");

    assert!(ht.insert(&7, &700).unwrap());
    assert!(ht.insert(&7, &701).unwrap());

    let mut values = lookup(&ht, 7);
    values.sort_unstable();
    assert_eq!(values, vec![700, 701]);
}

#[test]
fn test_remove_one_of_two() {
    let ctx = TestContext::new("test_remove_one_of_two");
    let ht = ctx.table("remove_one_of_two");

    assert!(ht.insert(&7, &700).unwrap());
    assert!(ht.insert(&7, &701).unwrap());
    assert!(ht.remove(&7, &700).unwrap());

    assert_eq!(lookup(&ht, 7), vec![701]);
    ht.verify_integrity();
}

#[test]
fn test_remove_is_idempotent() {
    let ctx = TestContext::new("test_remove_is_idempotent");
    let ht = ctx.table("remove_idempotent");

    assert!(ht.insert(&1, &10).unwrap());
    assert!(ht.remove(&1, &10).unwrap());
    assert!(!ht.remove(&1, &10).unwrap());
    assert!(lookup(&ht, 1).is_empty());

    // A removed pair can be reinserted into its tombstoned slot.
    assert!(ht.insert(&1, &10).unwrap());
    assert_eq!(lookup(&ht, 1), vec![10]);
}

#[test]
fn test_forced_split() {
    let ctx = TestContext::new("test_forced_split");
    let ht = ctx.table("forced_split");

    // Two depth-1 buckets hold at most 2 * capacity entries, so one more
    // forces at least one split regardless of the hash distribution.
    let num_keys = 2 * bucket_capacity() as u32 + 1;
    for key in 0..num_keys {
        assert!(ht.insert(&key, &key.wrapping_mul(31)).unwrap(), "insert {}", key);
    }

    assert!(ht.global_depth() >= 2, "global depth is {}", ht.global_depth());
    ht.verify_integrity();

    for key in 0..num_keys {
        assert_eq!(lookup(&ht, key), vec![key.wrapping_mul(31)], "key {}", key);
    }
}

#[test]
fn test_double_split() {
    let ctx = TestContext::new("test_double_split");
    let ht = ctx.table("double_split");

    // More entries than 4 buckets can hold forces the directory through at
    // least two doublings.
    let num_keys = 4 * bucket_capacity() as u32 + 1;
    for key in 0..num_keys {
        assert!(ht.insert(&key, &key.wrapping_mul(31)).unwrap(), "insert {}", key);
    }

    assert!(ht.global_depth() >= 3, "global depth is {}", ht.global_depth());
    ht.verify_integrity();

    for key in 0..num_keys {
        assert_eq!(lookup(&ht, key), vec![key.wrapping_mul(31)], "key {}", key);
    }

    // Splits must not resurrect removed pairs or drop live ones.
    for key in (0..num_keys).step_by(2) {
        assert!(ht.remove(&key, &key.wrapping_mul(31)).unwrap());
    }
    for key in 0..num_keys {
        let expected: Vec<u32> = if key % 2 == 0 {
            vec![]
        } else {
            vec![key.wrapping_mul(31)]
        };
        assert_eq!(lookup(&ht, key), expected, "key {}", key);
    }
    ht.verify_integrity();
}

#[test]
fn test_reopen_sees_existing_entries() {
    let ctx = TestContext::new("test_reopen");
    let directory_page_id;
    {
        let ht = ctx.table("reopen");
        directory_page_id = ht.directory_page_id();
        for key in 0..100u32 {
            assert!(ht.insert(&key, &(key + 1)).unwrap());
        }
        // Dropping the table releases its directory pin but frees nothing.
    }

    let ht = DiskExtendibleHashTable::<u32, u32>::open(
        "reopen",
        ctx.bpm.clone(),
        HashFunction::new(),
        directory_page_id,
    )
    .unwrap();
    for key in 0..100u32 {
        assert_eq!(lookup(&ht, key), vec![key + 1]);
    }
    ht.verify_integrity();
}

#[test]
fn test_concurrent_inserts_and_lookups() {
    let ctx = TestContext::new("test_concurrent");
    let ht = Arc::new(ctx.table("concurrent"));

    const THREADS: u32 = 4;
    const KEYS_PER_THREAD: u32 = 300;

    thread::scope(|scope| {
        for t in 0..THREADS {
            let ht = Arc::clone(&ht);
            scope.spawn(move || {
                let base = t * KEYS_PER_THREAD;
                for key in base..base + KEYS_PER_THREAD {
                    assert!(ht.insert(&key, &(key * 2)).unwrap());
                    // Reads interleave with other writers' splits.
                    let mut result = vec![];
                    ht.get_value(&key, &mut result).unwrap();
                    assert_eq!(result, vec![key * 2]);
                }
            });
        }
    });

    for key in 0..THREADS * KEYS_PER_THREAD {
        assert_eq!(lookup(&ht, key), vec![key * 2], "key {}", key);
    }
    ht.verify_integrity();
}

#[test]
fn test_destroy_then_rebuild() {
    let ctx = TestContext::new("test_destroy_then_rebuild");

    let ht = ctx.table("destroy_rebuild");
    for key in 0..50u32 {
        assert!(ht.insert(&key, &key).unwrap());
    }
    ht.destroy().unwrap();

    // The pool is clean enough to host a fresh table afterwards.
    let ht = ctx.table("destroy_rebuild_2");
    assert!(ht.insert(&1, &2).unwrap());
    assert_eq!(lookup(&ht, 1), vec![2]);
}
