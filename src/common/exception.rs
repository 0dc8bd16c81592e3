use thiserror::Error;

use crate::common::config::PageId;

#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("no evictable frame available in the buffer pool")]
    NoFreeFrame,
    #[error("page {0} not found in page table")]
    PageNotFound(PageId),
    #[error("page {0} is still pinned")]
    PagePinned(PageId),
    #[error("disk i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum HashTableError {
    #[error("buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),
    #[error("page {0} does not hold an initialized directory")]
    UninitializedDirectory(PageId),
}
