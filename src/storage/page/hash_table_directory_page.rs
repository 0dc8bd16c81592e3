use std::collections::HashMap;

use crate::common::config::{Lsn, PageId, DB_PAGE_SIZE, INVALID_PAGE_ID};
use crate::storage::page::page::Page;

pub const HTABLE_DIRECTORY_MAX_DEPTH: u32 = 9;

/// The directory array must grow in powers of 2, and 1024 page ids would
/// leave no room for the other fields, so 512 entries is the ceiling for one
/// page. Spanning multiple pages would lift this limit.
pub const HTABLE_DIRECTORY_ARRAY_SIZE: usize = 1 << HTABLE_DIRECTORY_MAX_DEPTH;

/**
 * Directory page for the extendible hash table.
 *
 * Directory format (size in bytes):
 *  ---------------------------------------------------------------------------------------
 * | PageId (8) | LSN (8) | GlobalDepth (4) | LocalDepths (512) | BucketPageIds (2048) | ...
 *  ---------------------------------------------------------------------------------------
 *
 * The leading page id is the initialization sentinel, as on bucket pages. The
 * LSN field is reserved for recovery and not driven here.
 */
const OFFSET_PAGE_ID: usize = 0;
const OFFSET_LSN: usize = 8;
const OFFSET_GLOBAL_DEPTH: usize = 16;
const OFFSET_LOCAL_DEPTHS: usize = 20;
const OFFSET_BUCKET_PAGE_IDS: usize = OFFSET_LOCAL_DEPTHS + HTABLE_DIRECTORY_ARRAY_SIZE;

fn read_u64(data: &[u8], offset: usize) -> u64 {
    u64::from_ne_bytes(data[offset..offset + 8].try_into().unwrap())
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_ne_bytes(data[offset..offset + 4].try_into().unwrap())
}

fn write_u64(data: &mut [u8], offset: usize, value: u64) {
    data[offset..offset + 8].copy_from_slice(&value.to_ne_bytes());
}

fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
}

/// Shared view over a pinned directory page.
pub struct HashTableDirectoryPage<'a> {
    data: &'a [u8; DB_PAGE_SIZE],
    initialized: bool,
}

impl<'a> HashTableDirectoryPage<'a> {
    pub fn attach(page: &'a Page) -> Self {
        Self {
            initialized: read_u64(page.data(), OFFSET_PAGE_ID) == page.page_id() as u64,
            data: page.data(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Returns the log sequence number of this page (reserved).
    pub fn lsn(&self) -> Lsn {
        read_u64(self.data, OFFSET_LSN)
    }

    /// Returns the global depth of the hash table directory.
    pub fn global_depth(&self) -> u32 {
        read_u32(self.data, OFFSET_GLOBAL_DEPTH)
    }

    /// Returns a mask of global-depth 1's and the rest 0's.
    pub fn global_depth_mask(&self) -> u64 {
        (1u64 << self.global_depth()) - 1
    }

    /// Returns the directory index the hash routes to.
    pub fn hash_to_bucket_index(&self, hash: u64) -> usize {
        (hash & self.global_depth_mask()) as usize
    }

    /// Returns the current directory size.
    pub fn size(&self) -> usize {
        1 << self.global_depth()
    }

    /// Returns the maximum directory size.
    pub fn max_size(&self) -> usize {
        HTABLE_DIRECTORY_ARRAY_SIZE
    }

    /// Gets the local depth of the bucket at the specified index.
    pub fn local_depth(&self, bucket_idx: usize) -> u32 {
        self.data[OFFSET_LOCAL_DEPTHS + bucket_idx] as u32
    }

    /// Returns a mask of local-depth 1's and the rest 0's.
    pub fn local_depth_mask(&self, bucket_idx: usize) -> u64 {
        (1u64 << self.local_depth(bucket_idx)) - 1
    }

    /// Looks up the bucket page id at a directory index.
    pub fn bucket_page_id(&self, bucket_idx: usize) -> PageId {
        read_u32(self.data, OFFSET_BUCKET_PAGE_IDS + bucket_idx * 4)
    }

    /// Gets the directory index of the split image of `bucket_idx`.
    pub fn split_image_index(&self, bucket_idx: usize) -> usize {
        bucket_idx ^ (1 << (self.local_depth(bucket_idx) - 1))
    }

    /// Verifies the integrity of the directory:
    ///
    /// 1. All local depths lie in `1..=global_depth` and the global depth
    ///    does not exceed the maximum.
    /// 2. Every active slot points at an allocated bucket page.
    /// 3. Each bucket has precisely 2^(global depth - local depth) pointers,
    ///    all at indices that agree on the low local-depth bits.
    pub fn verify_integrity(&self) {
        assert!(self.initialized, "directory page is not initialized");
        let global_depth = self.global_depth();
        assert!(
            (1..=HTABLE_DIRECTORY_MAX_DEPTH).contains(&global_depth),
            "global depth {} out of range",
            global_depth
        );

        let mut pointer_counts: HashMap<PageId, usize> = HashMap::new();
        let mut depths: HashMap<PageId, u32> = HashMap::new();

        for bucket_idx in 0..self.size() {
            let page_id = self.bucket_page_id(bucket_idx);
            let local_depth = self.local_depth(bucket_idx);

            assert_ne!(
                page_id, INVALID_PAGE_ID,
                "directory slot {} is unset",
                bucket_idx
            );
            assert!(
                local_depth >= 1 && local_depth <= global_depth,
                "local depth {} at slot {} out of range (global {})",
                local_depth,
                bucket_idx,
                global_depth
            );

            *pointer_counts.entry(page_id).or_insert(0) += 1;
            match depths.get(&page_id) {
                Some(&known) => assert_eq!(
                    known, local_depth,
                    "bucket {} referenced with inconsistent local depths",
                    page_id
                ),
                None => {
                    depths.insert(page_id, local_depth);
                }
            }

            // All slots sharing a bucket agree on the low local-depth bits.
            let canonical = bucket_idx & (self.local_depth_mask(bucket_idx) as usize);
            assert_eq!(
                self.bucket_page_id(canonical),
                page_id,
                "slot {} does not alias its canonical slot {}",
                bucket_idx,
                canonical
            );
        }

        for (page_id, count) in pointer_counts {
            let expected = 1usize << (global_depth - depths[&page_id]);
            assert_eq!(
                count, expected,
                "bucket {} referenced by {} slots, expected {}",
                page_id, count, expected
            );
        }
    }
}

/// Exclusive view over a pinned directory page. Attaching stamps the
/// sentinel and resets the image to an empty depth-1 directory if the page
/// was never written.
pub struct HashTableDirectoryPageMut<'a> {
    data: &'a mut [u8; DB_PAGE_SIZE],
}

impl<'a> HashTableDirectoryPageMut<'a> {
    pub fn attach(page: &'a mut Page) -> Self {
        let page_id = page.page_id() as u64;
        let data = page.data_mut();
        if read_u64(data, OFFSET_PAGE_ID) != page_id {
            data.fill(0);
            write_u64(data, OFFSET_PAGE_ID, page_id);
            write_u32(data, OFFSET_GLOBAL_DEPTH, 1);
        }
        Self { data }
    }

    pub fn as_read(&self) -> HashTableDirectoryPage<'_> {
        HashTableDirectoryPage {
            data: &*self.data,
            initialized: true,
        }
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        write_u64(self.data, OFFSET_LSN, lsn);
    }

    /// Increments the global depth of the directory.
    pub fn incr_global_depth(&mut self) {
        let global_depth = self.as_read().global_depth();
        debug_assert!(global_depth < HTABLE_DIRECTORY_MAX_DEPTH);
        write_u32(self.data, OFFSET_GLOBAL_DEPTH, global_depth + 1);
    }

    /// Sets the local depth of the bucket at the specified index.
    pub fn set_local_depth(&mut self, bucket_idx: usize, local_depth: u8) {
        self.data[OFFSET_LOCAL_DEPTHS + bucket_idx] = local_depth;
    }

    /// Updates the directory index with a bucket page id.
    pub fn set_bucket_page_id(&mut self, bucket_idx: usize, bucket_page_id: PageId) {
        write_u32(self.data, OFFSET_BUCKET_PAGE_IDS + bucket_idx * 4, bucket_page_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_initializes_fresh_page() {
        let mut page = Page::new(3);
        {
            let view = HashTableDirectoryPage::attach(&page);
            assert!(!view.is_initialized());
        }
        {
            let _ = HashTableDirectoryPageMut::attach(&mut page);
        }
        let view = HashTableDirectoryPage::attach(&page);
        assert!(view.is_initialized());
        assert_eq!(view.global_depth(), 1);
        assert_eq!(view.size(), 2);
        assert_eq!(view.bucket_page_id(0), INVALID_PAGE_ID);
    }

    #[test]
    fn test_routing_masks() {
        let mut page = Page::new(3);
        let mut dir = HashTableDirectoryPageMut::attach(&mut page);
        dir.incr_global_depth();
        dir.incr_global_depth(); // global depth 3

        let read = dir.as_read();
        assert_eq!(read.global_depth_mask(), 0b111);
        assert_eq!(read.hash_to_bucket_index(0b10110), 0b110);
    }

    #[test]
    fn test_verify_integrity_on_fresh_table_shape() {
        let mut page = Page::new(3);
        {
            let mut dir = HashTableDirectoryPageMut::attach(&mut page);
            dir.set_local_depth(0, 1);
            dir.set_local_depth(1, 1);
            dir.set_bucket_page_id(0, 4);
            dir.set_bucket_page_id(1, 5);
        }
        HashTableDirectoryPage::attach(&page).verify_integrity();
    }

    #[test]
    fn test_verify_integrity_with_shared_bucket() {
        let mut page = Page::new(3);
        {
            let mut dir = HashTableDirectoryPageMut::attach(&mut page);
            dir.incr_global_depth(); // global depth 2
            // Bucket 4 at local depth 1 is shared by slots 0 and 2.
            dir.set_local_depth(0, 1);
            dir.set_local_depth(2, 1);
            dir.set_bucket_page_id(0, 4);
            dir.set_bucket_page_id(2, 4);
            dir.set_local_depth(1, 2);
            dir.set_local_depth(3, 2);
            dir.set_bucket_page_id(1, 5);
            dir.set_bucket_page_id(3, 6);
        }
        let view = HashTableDirectoryPage::attach(&page);
        view.verify_integrity();
        assert_eq!(view.split_image_index(1), 3);
    }

    #[test]
    #[should_panic(expected = "unset")]
    fn test_verify_integrity_rejects_unset_slot() {
        let mut page = Page::new(3);
        {
            let mut dir = HashTableDirectoryPageMut::attach(&mut page);
            dir.set_local_depth(0, 1);
            dir.set_local_depth(1, 1);
            dir.set_bucket_page_id(0, 4);
            // slot 1 left unset
        }
        HashTableDirectoryPage::attach(&page).verify_integrity();
    }
}
