use std::marker::PhantomData;
use std::mem::size_of;

use crate::common::config::DB_PAGE_SIZE;
use crate::storage::page::hash_table_page_defs::{htable_bucket_array_size, FixedWidth, MappingType};
use crate::storage::page::page::Page;

/**
 * Store indexed key and value together within a bucket page. Supports
 * non-unique keys.
 *
 * Bucket page format:
 *  ------------------------------------------------------------------------
 * | PageId (8) | occupied bitmap | readable bitmap | KEY(1)+VALUE(1) | ... |
 *  ------------------------------------------------------------------------
 *
 * The leading page id doubles as the initialization sentinel: if it does not
 * echo the id of the page the image lives in, the image has never been
 * written and is treated as empty.
 *
 * `occupied` bits are sticky: set on the first write to a slot and never
 * cleared, so a probe chain may stop at the first unoccupied slot. `readable`
 * bits are cleared on removal, leaving a tombstone that a later insert can
 * reuse without breaking chains that pass over it.
 */
const OFFSET_PAGE_ID: usize = 0;
const BITMAP_BASE: usize = size_of::<u64>();

const fn entry_size<K: FixedWidth, V: FixedWidth>() -> usize {
    K::WIDTH + V::WIDTH
}

const fn array_size<K: FixedWidth, V: FixedWidth>() -> usize {
    htable_bucket_array_size(entry_size::<K, V>())
}

const fn bitmap_bytes<K: FixedWidth, V: FixedWidth>() -> usize {
    (array_size::<K, V>() + 7) / 8
}

const fn offset_occupied() -> usize {
    BITMAP_BASE
}

const fn offset_readable<K: FixedWidth, V: FixedWidth>() -> usize {
    BITMAP_BASE + bitmap_bytes::<K, V>()
}

const fn offset_data<K: FixedWidth, V: FixedWidth>() -> usize {
    BITMAP_BASE + 2 * bitmap_bytes::<K, V>()
}

fn bit_is_set(data: &[u8], base: usize, idx: usize) -> bool {
    data[base + idx / 8] & (1 << (idx % 8)) != 0
}

fn set_bit(data: &mut [u8], base: usize, idx: usize) {
    data[base + idx / 8] |= 1 << (idx % 8);
}

fn clear_bit(data: &mut [u8], base: usize, idx: usize) {
    data[base + idx / 8] &= !(1 << (idx % 8));
}

fn read_sentinel(data: &[u8; DB_PAGE_SIZE]) -> u64 {
    u64::from_ne_bytes(data[OFFSET_PAGE_ID..OFFSET_PAGE_ID + 8].try_into().unwrap())
}

/// Shared view over a pinned bucket page. If the sentinel does not match the
/// page's id the view reads as an empty bucket.
pub struct HashTableBucketPage<'a, K, V> {
    data: &'a [u8; DB_PAGE_SIZE],
    initialized: bool,
    _marker: PhantomData<MappingType<K, V>>,
}

impl<'a, K: FixedWidth, V: FixedWidth> HashTableBucketPage<'a, K, V> {
    pub fn attach(page: &'a Page) -> Self {
        Self {
            initialized: read_sentinel(page.data()) == page.page_id() as u64,
            data: page.data(),
            _marker: PhantomData,
        }
    }

    pub fn array_size() -> usize {
        array_size::<K, V>()
    }

    /// Returns whether the slot holds a key/value pair or a tombstone.
    pub fn is_occupied(&self, bucket_idx: usize) -> bool {
        self.initialized && bit_is_set(self.data, offset_occupied(), bucket_idx)
    }

    /// Returns whether the slot holds a live key/value pair.
    pub fn is_readable(&self, bucket_idx: usize) -> bool {
        self.initialized && bit_is_set(self.data, offset_readable::<K, V>(), bucket_idx)
    }

    /// Returns the entry at `bucket_idx` if it is live.
    pub fn entry_at(&self, bucket_idx: usize) -> Option<MappingType<K, V>> {
        if !self.is_readable(bucket_idx) {
            return None;
        }
        let off = offset_data::<K, V>() + bucket_idx * entry_size::<K, V>();
        let key = K::decode_from(&self.data[off..off + K::WIDTH]);
        let value = V::decode_from(&self.data[off + K::WIDTH..off + entry_size::<K, V>()]);
        Some((key, value))
    }

    pub fn key_at(&self, bucket_idx: usize) -> Option<K> {
        self.entry_at(bucket_idx).map(|(k, _)| k)
    }

    pub fn value_at(&self, bucket_idx: usize) -> Option<V> {
        self.entry_at(bucket_idx).map(|(_, v)| v)
    }

    /// Returns the number of live entries, i.e. the current size.
    pub fn num_readable(&self) -> usize {
        (0..array_size::<K, V>())
            .filter(|&i| self.is_readable(i))
            .count()
    }

    pub fn is_full(&self) -> bool {
        self.num_readable() == array_size::<K, V>()
    }

    pub fn is_empty(&self) -> bool {
        self.num_readable() == 0
    }
}

/// Exclusive view over a pinned bucket page. Attaching stamps the sentinel
/// and zero-initializes the image if the page was never written.
pub struct HashTableBucketPageMut<'a, K, V> {
    data: &'a mut [u8; DB_PAGE_SIZE],
    _marker: PhantomData<MappingType<K, V>>,
}

impl<'a, K: FixedWidth, V: FixedWidth> HashTableBucketPageMut<'a, K, V> {
    pub fn attach(page: &'a mut Page) -> Self {
        let page_id = page.page_id() as u64;
        let data = page.data_mut();
        if read_sentinel(data) != page_id {
            data.fill(0);
            data[OFFSET_PAGE_ID..OFFSET_PAGE_ID + 8].copy_from_slice(&page_id.to_ne_bytes());
        }
        Self {
            data,
            _marker: PhantomData,
        }
    }

    pub fn as_read(&self) -> HashTableBucketPage<'_, K, V> {
        HashTableBucketPage {
            data: &*self.data,
            initialized: true,
            _marker: PhantomData,
        }
    }

    /// Returns the entry at `bucket_idx` if it is live.
    pub fn get(&self, bucket_idx: usize) -> Option<MappingType<K, V>> {
        self.as_read().entry_at(bucket_idx)
    }

    /// Writes `(key, value)` into the slot unless it already holds a live
    /// entry. Sets both the occupied and readable bits; the occupied bit
    /// stays set for the life of the page.
    pub fn put(&mut self, bucket_idx: usize, key: &K, value: &V) -> bool {
        if self.as_read().is_readable(bucket_idx) {
            return false;
        }
        let off = offset_data::<K, V>() + bucket_idx * entry_size::<K, V>();
        key.encode_into(&mut self.data[off..off + K::WIDTH]);
        value.encode_into(&mut self.data[off + K::WIDTH..off + entry_size::<K, V>()]);
        set_bit(self.data, offset_occupied(), bucket_idx);
        set_bit(self.data, offset_readable::<K, V>(), bucket_idx);
        true
    }

    /// Linearly probes from `start`, reusing tombstones, until the pair is
    /// stored or the probe wraps all the way around (bucket full).
    pub fn insert(&mut self, key: &K, value: &V, start: usize) -> bool {
        let n = array_size::<K, V>();
        debug_assert!(start < n);
        let mut idx = start;
        loop {
            if self.put(idx, key, value) {
                return true;
            }
            idx = (idx + 1) % n;
            if idx == start {
                return false;
            }
        }
    }

    /// Tombstones the slot if it holds exactly `(key, value)`. The occupied
    /// bit is left set.
    pub fn remove(&mut self, bucket_idx: usize, key: &K, value: &V) -> bool {
        match self.get(bucket_idx) {
            Some((k, v)) if k == *key && v == *value => {
                clear_bit(self.data, offset_readable::<K, V>(), bucket_idx);
                true
            }
            _ => false,
        }
    }

    /// Tombstones the slot unconditionally.
    pub fn force_remove(&mut self, bucket_idx: usize) {
        clear_bit(self.data, offset_readable::<K, V>(), bucket_idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type View<'a> = HashTableBucketPage<'a, u32, u32>;
    type ViewMut<'a> = HashTableBucketPageMut<'a, u32, u32>;

    #[test]
    fn test_attach_initializes_fresh_page() {
        let mut page = Page::new(7);
        {
            let view = View::attach(&page);
            assert!(!view.is_occupied(0));
        }
        {
            let _ = ViewMut::attach(&mut page);
        }
        let view = View::attach(&page);
        assert!(view.is_empty());
        assert!(page.is_dirty());
    }

    #[test]
    fn test_put_get_remove_slot() {
        let mut page = Page::new(7);
        let mut bucket = ViewMut::attach(&mut page);

        assert!(bucket.put(3, &10, &100));
        assert!(!bucket.put(3, &11, &110), "live slot must reject a second put");
        assert_eq!(bucket.get(3), Some((10, 100)));

        assert!(!bucket.remove(3, &10, &999), "value must match exactly");
        assert!(bucket.remove(3, &10, &100));
        assert_eq!(bucket.get(3), None);

        // Tombstone: occupied stays set, readable is gone.
        let read = bucket.as_read();
        assert!(read.is_occupied(3));
        assert!(!read.is_readable(3));
    }

    #[test]
    fn test_insert_probes_and_reuses_tombstones() {
        let mut page = Page::new(9);
        let mut bucket = ViewMut::attach(&mut page);

        assert!(bucket.insert(&1, &10, 5));
        assert!(bucket.insert(&2, &20, 5));
        assert_eq!(bucket.get(5), Some((1, 10)));
        assert_eq!(bucket.get(6), Some((2, 20)));

        bucket.force_remove(5);
        assert!(bucket.insert(&3, &30, 5));
        assert_eq!(bucket.get(5), Some((3, 30)), "tombstone must be reused");
    }

    #[test]
    fn test_insert_wraps_around() {
        let n = View::array_size();
        let mut page = Page::new(11);
        let mut bucket = ViewMut::attach(&mut page);

        // Fill every slot except slot 0, starting near the end.
        for i in 1..n {
            assert!(bucket.put(i, &(i as u32), &0));
        }
        assert!(bucket.insert(&7777, &1, n - 1), "probe must wrap to slot 0");
        assert_eq!(bucket.get(0), Some((7777, 1)));

        assert!(bucket.as_read().is_full());
        assert!(!bucket.insert(&8888, &2, 0), "full bucket must reject inserts");
    }

    #[test]
    fn test_stale_image_reads_as_empty() {
        let mut page = Page::new(13);
        {
            let mut bucket = ViewMut::attach(&mut page);
            assert!(bucket.put(0, &1, &1));
        }
        // Re-home the frame under a different id; the old image must not leak.
        page.reset(21);
        let view = View::attach(&page);
        assert!(!view.is_occupied(0));
        assert_eq!(view.num_readable(), 0);
    }
}
