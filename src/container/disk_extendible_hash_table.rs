use parking_lot::RwLock;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::buffer::buffer_pool_manager::BufferPoolManager;
use crate::common::config::{PageId, INVALID_PAGE_ID};
use crate::common::exception::HashTableError;
use crate::container::hash_function::HashFunction;
use crate::storage::page::hash_table_bucket_page::{HashTableBucketPage, HashTableBucketPageMut};
use crate::storage::page::hash_table_directory_page::{
    HashTableDirectoryPage, HashTableDirectoryPageMut, HTABLE_DIRECTORY_MAX_DEPTH,
};
use crate::storage::page::hash_table_page_defs::{htable_bucket_array_size, FixedWidth};
use crate::storage::page::page_guard::PageGuard;

/// Disk-backed extendible hash table, keyed by hash prefix through a single
/// directory page. Non-unique keys are supported: the table is a multimap
/// over fixed-width keys and values. Buckets split independently as they
/// fill, doubling the directory when a bucket's local depth reaches the
/// global depth; buckets are never merged on deletion.
///
/// Latch protocol: `get_value` and `remove` take the table latch shared and
/// the bucket page latch in the matching mode; `insert` takes the table latch
/// exclusive and holds it across any split, so readers observe either the
/// pre-split or the fully post-split directory, never an intermediate one.
/// Latches are acquired table first, then the overflowing bucket, then
/// freshly allocated pages; the directory image itself is only mutated under
/// the exclusive table latch.
pub struct DiskExtendibleHashTable<K, V> {
    index_name: String,
    bpm: Arc<BufferPoolManager>,
    /// Pin on the directory page, held for the lifetime of the table.
    directory: PageGuard,
    table_latch: RwLock<()>,
    hash_fn: HashFunction<K>,
    _marker: PhantomData<V>,
}

/// Routing state resolved from the directory for one hashed key.
struct Route {
    bucket_page_id: PageId,
    local_depth: u32,
    /// Starting probe slot inside the bucket.
    start: usize,
}

impl<K, V> DiskExtendibleHashTable<K, V>
where
    K: FixedWidth + Hash,
    V: FixedWidth,
{
    /// Number of entries one bucket page holds for this `(K, V)` pair.
    pub const fn bucket_capacity() -> usize {
        htable_bucket_array_size(K::WIDTH + V::WIDTH)
    }

    /// Creates a new table: allocates the directory page and two depth-1
    /// buckets. On failure nothing allocated here leaks.
    pub fn new(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        hash_fn: HashFunction<K>,
    ) -> Result<Self, HashTableError> {
        let index_name = name.into();
        let directory = bpm.new_page()?;
        let directory_page_id = directory.page_id();

        if let Err(e) = Self::bootstrap(&bpm, &directory) {
            drop(directory);
            if let Err(free_err) = bpm.delete_page(directory_page_id) {
                warn!(
                    "failed to free directory page {} while unwinding: {}",
                    directory_page_id, free_err
                );
            }
            return Err(e);
        }

        info!(
            "created extendible hash table {:?} with directory page {}",
            index_name, directory_page_id
        );
        Ok(Self {
            index_name,
            bpm,
            directory,
            table_latch: RwLock::new(()),
            hash_fn,
            _marker: PhantomData,
        })
    }

    /// Seeds a fresh directory page: global depth 1, two new bucket pages.
    fn bootstrap(bpm: &Arc<BufferPoolManager>, directory: &PageGuard) -> Result<(), HashTableError> {
        let mut directory_page = directory.write();

        let bucket_0 = bpm.new_page()?;
        let bucket_1 = match bpm.new_page() {
            Ok(guard) => guard,
            Err(e) => {
                let bucket_0_id = bucket_0.page_id();
                drop(bucket_0);
                if let Err(free_err) = bpm.delete_page(bucket_0_id) {
                    warn!(
                        "failed to free bucket page {} while unwinding: {}",
                        bucket_0_id, free_err
                    );
                }
                return Err(e.into());
            }
        };

        {
            let mut page = bucket_0.write();
            HashTableBucketPageMut::<K, V>::attach(&mut page);
        }
        {
            let mut page = bucket_1.write();
            HashTableBucketPageMut::<K, V>::attach(&mut page);
        }

        let mut dir = HashTableDirectoryPageMut::attach(&mut directory_page);
        dir.set_local_depth(0, 1);
        dir.set_local_depth(1, 1);
        dir.set_bucket_page_id(0, bucket_0.page_id());
        dir.set_bucket_page_id(1, bucket_1.page_id());
        Ok(())
    }

    /// Reopens a table from an existing directory page.
    pub fn open(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        hash_fn: HashFunction<K>,
        directory_page_id: PageId,
    ) -> Result<Self, HashTableError> {
        let index_name = name.into();
        let directory = bpm.fetch_page(directory_page_id)?;
        {
            let directory_page = directory.read();
            let dir = HashTableDirectoryPage::attach(&directory_page);
            if !dir.is_initialized() || dir.bucket_page_id(0) == INVALID_PAGE_ID {
                return Err(HashTableError::UninitializedDirectory(directory_page_id));
            }
        }

        info!(
            "opened extendible hash table {:?} from directory page {}",
            index_name, directory_page_id
        );
        Ok(Self {
            index_name,
            bpm,
            directory,
            table_latch: RwLock::new(()),
            hash_fn,
            _marker: PhantomData,
        })
    }

    /// Page id of the directory, for reopening the table later.
    pub fn directory_page_id(&self) -> PageId {
        self.directory.page_id()
    }

    pub fn name(&self) -> &str {
        &self.index_name
    }

    /// Current global depth of the directory.
    pub fn global_depth(&self) -> u32 {
        let _table = self.table_latch.read();
        let directory_page = self.directory.read();
        HashTableDirectoryPage::attach(&directory_page).global_depth()
    }

    /// Appends every live value stored under `key` to `result`. Keys whose
    /// hash routes elsewhere cannot collide in the resolved bucket, so the
    /// local probe-chain scan is complete.
    pub fn get_value(&self, key: &K, result: &mut Vec<V>) -> Result<(), HashTableError> {
        let hash = self.hash_fn.get_hash(key);
        let _table = self.table_latch.read();

        let route = self.route(hash);
        let bucket = self.bpm.fetch_page(route.bucket_page_id)?;
        let page = bucket.read();
        let view = HashTableBucketPage::<K, V>::attach(&page);

        let n = Self::bucket_capacity();
        let mut idx = route.start;
        loop {
            if !view.is_occupied(idx) {
                break;
            }
            if let Some((k, v)) = view.entry_at(idx) {
                if k == *key {
                    result.push(v);
                }
            }
            idx = (idx + 1) % n;
            if idx == route.start {
                break;
            }
        }
        Ok(())
    }

    /// Inserts a key/value pair. Returns `Ok(false)` only when the target
    /// bucket is full and can no longer split because its local depth has
    /// reached the directory's maximum depth: a capacity error the caller
    /// must handle.
    pub fn insert(&self, key: &K, value: &V) -> Result<bool, HashTableError> {
        let hash = self.hash_fn.get_hash(key);
        let _table = self.table_latch.write();
        debug!("{}: insert hash {:#018x}", self.index_name, hash);

        loop {
            let route = self.route(hash);
            let bucket = self.bpm.fetch_page(route.bucket_page_id)?;
            let inserted = {
                let mut page = bucket.write();
                let mut view = HashTableBucketPageMut::<K, V>::attach(&mut page);
                view.insert(key, value, route.start)
            };
            if inserted {
                return Ok(true);
            }
            drop(bucket);

            if route.local_depth >= HTABLE_DIRECTORY_MAX_DEPTH {
                warn!(
                    "{}: bucket page {} full at maximum depth {}, rejecting insert",
                    self.index_name, route.bucket_page_id, route.local_depth
                );
                return Ok(false);
            }
            if let Some(inserted_into_mirror) = self.split_bucket(hash, key, value)? {
                return Ok(inserted_into_mirror);
            }
            // Split complete but the pair is not placed yet; retry from the
            // directory. Pathological distributions may split repeatedly.
        }
    }

    /// Tombstones every live `(key, value)` match along the probe chain.
    /// Removing a missing pair is a no-op; buckets are never merged.
    pub fn remove(&self, key: &K, value: &V) -> Result<bool, HashTableError> {
        let hash = self.hash_fn.get_hash(key);
        let _table = self.table_latch.read();
        debug!("{}: remove hash {:#018x}", self.index_name, hash);

        let route = self.route(hash);
        let bucket = self.bpm.fetch_page(route.bucket_page_id)?;
        let mut page = bucket.write();
        let mut view = HashTableBucketPageMut::<K, V>::attach(&mut page);

        let n = Self::bucket_capacity();
        let mut removed = false;
        let mut idx = route.start;
        loop {
            if !view.as_read().is_occupied(idx) {
                break;
            }
            if view.remove(idx, key, value) {
                removed = true;
            }
            idx = (idx + 1) % n;
            if idx == route.start {
                break;
            }
        }
        Ok(removed)
    }

    /// Frees every bucket page referenced by the directory, then the
    /// directory page itself. Free failures are reported after all frees
    /// have been attempted.
    pub fn destroy(self) -> Result<(), HashTableError> {
        let bucket_ids: Vec<PageId> = {
            let _table = self.table_latch.write();
            let directory_page = self.directory.read();
            let dir = HashTableDirectoryPage::attach(&directory_page);
            let mut ids: Vec<PageId> = (0..dir.size()).map(|i| dir.bucket_page_id(i)).collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };

        let directory_page_id = self.directory.page_id();
        info!(
            "destroying extendible hash table {:?}: {} buckets + directory page {}",
            self.index_name,
            bucket_ids.len(),
            directory_page_id
        );

        let Self { bpm, directory, .. } = self;
        drop(directory); // release the lifetime pin before freeing

        let mut first_error = None;
        for page_id in bucket_ids {
            if let Err(e) = bpm.delete_page(page_id) {
                warn!("failed to free bucket page {}: {}", page_id, e);
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = bpm.delete_page(directory_page_id) {
            warn!("failed to free directory page {}: {}", directory_page_id, e);
            first_error.get_or_insert(e);
        }

        match first_error {
            None => Ok(()),
            Some(e) => Err(e.into()),
        }
    }

    /// Checks every directory invariant plus the probe-chain invariant of
    /// each referenced bucket. Panics on violation; intended for tests and
    /// debugging.
    pub fn verify_integrity(&self) {
        let _table = self.table_latch.read();
        let directory_page = self.directory.read();
        let dir = HashTableDirectoryPage::attach(&directory_page);
        dir.verify_integrity();

        let mut seen = std::collections::HashSet::new();
        for bucket_idx in 0..dir.size() {
            let page_id = dir.bucket_page_id(bucket_idx);
            if !seen.insert(page_id) {
                continue;
            }
            let bucket = self
                .bpm
                .fetch_page(page_id)
                .expect("directory references an unfetchable bucket page");
            let page = bucket.read();
            let view = HashTableBucketPage::<K, V>::attach(&page);
            for slot in 0..Self::bucket_capacity() {
                if view.is_readable(slot) {
                    assert!(
                        view.is_occupied(slot),
                        "live slot {} of bucket {} is not marked occupied",
                        slot,
                        page_id
                    );
                }
            }
        }
    }

    /// Resolves the directory for one hash under the current global depth.
    fn route(&self, hash: u64) -> Route {
        let directory_page = self.directory.read();
        let dir = HashTableDirectoryPage::attach(&directory_page);
        let bucket_idx = dir.hash_to_bucket_index(hash);
        Route {
            bucket_page_id: dir.bucket_page_id(bucket_idx),
            local_depth: dir.local_depth(bucket_idx),
            start: Self::local_index(hash),
        }
    }

    /// Starting probe slot: hash bits above any possible directory prefix,
    /// reduced modulo the bucket capacity, so co-located keys do not pile
    /// onto one slot. Taking the bits above the maximum directory depth
    /// keeps the slot stable across doublings; a start derived from the
    /// current global depth would strand entries behind their own probe
    /// chains once the directory grows.
    fn local_index(hash: u64) -> usize {
        ((hash >> HTABLE_DIRECTORY_MAX_DEPTH) & 0xFFFF) as usize % Self::bucket_capacity()
    }

    /// Splits the overflowing bucket the hash routes to. Both replacement
    /// pages are allocated and latched before any directory byte changes, so
    /// an allocation failure leaves the table exactly as it was. Returns
    /// `Ok(Some(true))` when the pending pair was placed directly into the
    /// mirror bucket, `Ok(None)` when the caller should re-route and retry.
    fn split_bucket(
        &self,
        hash: u64,
        key: &K,
        value: &V,
    ) -> Result<Option<bool>, HashTableError> {
        let mut directory_page = self.directory.write();

        let (old_idx, local_depth, global_depth, old_page_id) = {
            let dir = HashTableDirectoryPage::attach(&directory_page);
            let idx = dir.hash_to_bucket_index(hash);
            (idx, dir.local_depth(idx), dir.global_depth(), dir.bucket_page_id(idx))
        };
        debug!(
            "{}: splitting bucket page {} (slot {}, local depth {}, global depth {})",
            self.index_name, old_page_id, old_idx, local_depth, global_depth
        );

        // Latch order: old bucket before the fresh pages.
        let old_bucket = self.bpm.fetch_page(old_page_id)?;
        let old_page = old_bucket.write();

        // Stage both new pages before touching the directory so that a failed
        // allocation rolls back to an untouched table.
        let replacement = self.bpm.new_page()?;
        let mirror = match self.bpm.new_page() {
            Ok(guard) => guard,
            Err(e) => {
                let replacement_id = replacement.page_id();
                drop(replacement);
                if let Err(free_err) = self.bpm.delete_page(replacement_id) {
                    warn!(
                        "failed to free bucket page {} while unwinding: {}",
                        replacement_id, free_err
                    );
                }
                return Err(e.into());
            }
        };

        let mut replacement_page = replacement.write();
        let mut mirror_page = mirror.write();
        let mut replacement_view = HashTableBucketPageMut::<K, V>::attach(&mut replacement_page);
        let mut mirror_view = HashTableBucketPageMut::<K, V>::attach(&mut mirror_page);

        // Commit the new directory shape.
        let mut dir = HashTableDirectoryPageMut::attach(&mut directory_page);
        let new_depth = (local_depth + 1) as u8;
        if local_depth == global_depth {
            // Double in place by appending: under low-bit routing the upper
            // half of the grown directory mirrors the lower half, since slot
            // s + 2^G shares its low G bits with slot s. Every write lands
            // above the old range, so nothing is clobbered.
            let old_size = 1usize << global_depth;
            for s in 0..old_size {
                let page_id = dir.as_read().bucket_page_id(s);
                let depth = dir.as_read().local_depth(s) as u8;
                dir.set_bucket_page_id(s + old_size, page_id);
                dir.set_local_depth(s + old_size, depth);
            }
            dir.incr_global_depth();
            debug!(
                "{}: directory doubled to global depth {}",
                self.index_name,
                global_depth + 1
            );

            // The split bucket's two children sit at old_idx and its new
            // high-bit sibling old_idx + 2^G.
            dir.set_bucket_page_id(old_idx, replacement.page_id());
            dir.set_local_depth(old_idx, new_depth);
            dir.set_bucket_page_id(old_idx | (1 << local_depth), mirror.page_id());
            dir.set_local_depth(old_idx | (1 << local_depth), new_depth);
        } else {
            // 2^(G-L) slots alias the old bucket; bit L of each slot picks
            // its side of the split.
            let size = 1usize << global_depth;
            let stride = 1usize << local_depth;
            let base = old_idx & (stride - 1);
            for slot in (base..size).step_by(stride) {
                if (slot >> local_depth) & 1 == 0 {
                    dir.set_bucket_page_id(slot, replacement.page_id());
                } else {
                    dir.set_bucket_page_id(slot, mirror.page_id());
                }
                dir.set_local_depth(slot, new_depth);
            }
        }
        // Rehash the live entries of the old bucket across the split pair:
        // bit L of the digest decides the side. Capacity is preserved and
        // the entries are partitioned, so neither side can overflow.
        let old_view = HashTableBucketPage::<K, V>::attach(&old_page);
        for slot in 0..Self::bucket_capacity() {
            if let Some((k, v)) = old_view.entry_at(slot) {
                let entry_hash = self.hash_fn.get_hash(&k);
                let start = Self::local_index(entry_hash);
                let moved = if (entry_hash >> local_depth) & 1 == 1 {
                    mirror_view.insert(&k, &v, start)
                } else {
                    replacement_view.insert(&k, &v, start)
                };
                assert!(moved, "rehash target bucket cannot overflow during a split");
            }
        }

        // Retire the old page. The directory no longer references it, so a
        // free failure costs a leaked page, not correctness.
        drop(old_view);
        drop(old_page);
        drop(old_bucket);
        if let Err(e) = self.bpm.delete_page(old_page_id) {
            warn!("failed to free split bucket page {}: {}", old_page_id, e);
        }

        // If the pending key now routes to the mirror bucket, place it there
        // directly while its latch is still held.
        let new_idx = dir.as_read().hash_to_bucket_index(hash);
        if dir.as_read().bucket_page_id(new_idx) == mirror.page_id() {
            let start = Self::local_index(hash);
            if mirror_view.insert(key, value, start) {
                return Ok(Some(true));
            }
            // Mirror filled up in the meantime; let the caller split again.
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::lru_k_replacer::LRUKReplacer;
    use crate::common::config::LRUK_REPLACER_K;
    use crate::common::logger::initialize_logger;
    use crate::common::rid::Rid;
    use crate::storage::disk::disk_manager::{DiskIO, FileDiskManager};
    use tempfile::TempDir;

    struct TestContext {
        bpm: Arc<BufferPoolManager>,
        _temp_dir: TempDir,
    }

    impl TestContext {
        fn new(name: &str) -> Self {
            initialize_logger();
            const BUFFER_POOL_SIZE: usize = 32;

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

        fn bpm(&self) -> Arc<BufferPoolManager> {
            self.bpm.clone()
        }
    }

    #[test]
    fn test_insert_and_get() {
        let ctx = TestContext::new("test_insert_and_get");
        let ht = DiskExtendibleHashTable::<u32, Rid>::new(
            "test_table",
            ctx.bpm(),
            HashFunction::new(),
        )
        .unwrap();

        let rid1 = Rid::new(1, 0);
        let rid2 = Rid::new(2, 0);
        assert!(ht.insert(&1, &rid1).unwrap());
        assert!(ht.insert(&2, &rid2).unwrap());

        let mut result = vec![];
        ht.get_value(&1, &mut result).unwrap();
        assert_eq!(result, vec![rid1]);

        result.clear();
        ht.get_value(&2, &mut result).unwrap();
        assert_eq!(result, vec![rid2]);

        result.clear();
        ht.get_value(&3, &mut result).unwrap();
        assert!(result.is_empty());

        ht.verify_integrity();
    }

    #[test]
    fn test_remove() {
        let ctx = TestContext::new("test_remove");
        let ht = DiskExtendibleHashTable::<u32, Rid>::new(
            "test_table",
            ctx.bpm(),
            HashFunction::new(),
        )
        .unwrap();

        let rid = Rid::new(1, 1);
        assert!(ht.insert(&1, &rid).unwrap());
        assert!(ht.remove(&1, &rid).unwrap());

        let mut result = vec![];
        ht.get_value(&1, &mut result).unwrap();
        assert!(result.is_empty());

        // Removing again is a no-op.
        assert!(!ht.remove(&1, &rid).unwrap());
        ht.verify_integrity();
    }

    #[test]
    fn test_multimap_duplicate_keys() {
        let ctx = TestContext::new("test_multimap_duplicate_keys");
        let ht = DiskExtendibleHashTable::<u32, u32>::new(
            "test_table",
            ctx.bpm(),
            HashFunction::new(),
        )
        .unwrap();

        assert!(ht.insert(&7, &700).unwrap());
        assert!(ht.insert(&7, &701).unwrap());

        let mut result = vec![];
        ht.get_value(&7, &mut result).unwrap();
        result.sort_unstable();
        assert_eq!(result, vec![700, 701]);

        assert!(ht.remove(&7, &700).unwrap());
        result.clear();
        ht.get_value(&7, &mut result).unwrap();
        assert_eq!(result, vec![701]);
    }

    #[test]
    fn test_destroy_frees_pages() {
        let ctx = TestContext::new("test_destroy_frees_pages");
        let ht = DiskExtendibleHashTable::<u32, u32>::new(
            "test_table",
            ctx.bpm(),
            HashFunction::new(),
        )
        .unwrap();

        for i in 0..10u32 {
            assert!(ht.insert(&i, &(i * 10)).unwrap());
        }
        ht.destroy().unwrap();
    }

    #[test]
    fn test_open_rejects_uninitialized_page() {
        let ctx = TestContext::new("test_open_rejects_uninitialized_page");
        let bpm = ctx.bpm();

        let page_id = {
            let guard = bpm.new_page().unwrap();
            guard.page_id()
        };
        let result = DiskExtendibleHashTable::<u32, u32>::open(
            "bogus",
            bpm,
            HashFunction::new(),
            page_id,
        );
        assert!(matches!(
            result,
            Err(HashTableError::UninitializedDirectory(_))
        ));
    }
}
