use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;

use crate::buffer::buffer_pool_manager::BufferPoolManager;
use crate::common::config::PageId;
use crate::storage::page::page::Page;

/// A pin on a buffer-pool frame. While the guard lives the page stays
/// resident; `read`/`write` take the per-page latch. Dropping the guard
/// unpins the page, so every pin is paired with exactly one unpin even on
/// error paths.
///
/// Callers must drop any latch obtained from `read`/`write` before dropping
/// the guard itself (the borrow checker enforces this), which yields the
/// release order the latch protocol requires: page latch first, then pin.
pub struct PageGuard {
    bpm: Arc<BufferPoolManager>,
    page: Arc<RwLock<Page>>,
    page_id: PageId,
}

impl PageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page: Arc<RwLock<Page>>, page_id: PageId) -> Self {
        Self { bpm, page, page_id }
    }

    /// Acquires the page latch in shared mode.
    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    /// Acquires the page latch in exclusive mode.
    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write()
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        self.bpm.unpin_page(self.page_id);
    }
}
