pub const INVALID_PAGE_ID: PageId = 0; // page id 0 is never vended by the allocator
pub const INVALID_LSN: Lsn = u64::MAX; // invalid log sequence number
pub const DB_PAGE_SIZE: usize = 4096; // size of a data page in bytes
pub const BUFFER_POOL_SIZE: usize = 64; // default size of the buffer pool
pub const LRUK_REPLACER_K: usize = 2; // lookback window for the lru-k replacer

pub type FrameId = usize; // frame id type
pub type PageId = u32; // page id type
pub type Lsn = u64; // log sequence number type
