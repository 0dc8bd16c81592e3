use std::fmt::Debug;
use std::mem::size_of;

use crate::common::config::DB_PAGE_SIZE;
use crate::common::rid::Rid;

pub type MappingType<KeyType, ValueType> = (KeyType, ValueType);

/// Bytes reserved at the front of a bucket page for the page-id sentinel.
pub const HTABLE_BUCKET_PAGE_METADATA_SIZE: usize = size_of::<u64>();

/// BUCKET_ARRAY_SIZE is the number of (key, value) pairs that can be stored in
/// an extendible hash index bucket page. Each pair needs two additional bits
/// for its occupied and readable flags, so the space left after the metadata
/// divides as 4 * space / (4 * sizeof(MappingType) + 1): 0.25 bytes = 2 bits
/// per pair of bitmap overhead.
pub const fn htable_bucket_array_size(entry_size: usize) -> usize {
    4 * (DB_PAGE_SIZE - HTABLE_BUCKET_PAGE_METADATA_SIZE) / (4 * entry_size + 1)
}

/// A type that occupies a fixed number of bytes inside a page image. Keys and
/// values of the hash index must implement this; the encoding uses host
/// endianness, matching the rest of the page layout.
pub trait FixedWidth: Copy + PartialEq + Debug + Send + Sync + 'static {
    const WIDTH: usize;

    fn encode_into(&self, dst: &mut [u8]);
    fn decode_from(src: &[u8]) -> Self;
}

macro_rules! fixed_width_int {
    ($($t:ty),* $(,)?) => {$(
        impl FixedWidth for $t {
            const WIDTH: usize = size_of::<$t>();

            fn encode_into(&self, dst: &mut [u8]) {
                dst[..Self::WIDTH].copy_from_slice(&self.to_ne_bytes());
            }

            fn decode_from(src: &[u8]) -> Self {
                Self::from_ne_bytes(src[..Self::WIDTH].try_into().unwrap())
            }
        }
    )*};
}

fixed_width_int!(u16, u32, u64, i16, i32, i64);

impl FixedWidth for Rid {
    const WIDTH: usize = size_of::<u32>() * 2;

    fn encode_into(&self, dst: &mut [u8]) {
        dst[..4].copy_from_slice(&self.page_id().to_ne_bytes());
        dst[4..8].copy_from_slice(&self.slot_num().to_ne_bytes());
    }

    fn decode_from(src: &[u8]) -> Self {
        let page_id = u32::from_ne_bytes(src[..4].try_into().unwrap());
        let slot_num = u32::from_ne_bytes(src[4..8].try_into().unwrap());
        Rid::new(page_id, slot_num)
    }
}
