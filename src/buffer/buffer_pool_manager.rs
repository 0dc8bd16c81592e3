use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io::{Error, ErrorKind};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, warn};

use crate::buffer::lru_k_replacer::{AccessType, LRUKReplacer};
use crate::common::config::{FrameId, PageId, DB_PAGE_SIZE, INVALID_PAGE_ID};
use crate::common::exception::BufferPoolError;
use crate::storage::disk::disk_manager::DiskIO;
use crate::storage::disk::disk_scheduler::DiskScheduler;
use crate::storage::page::page::Page;
use crate::storage::page::page_guard::PageGuard;

/// The buffer pool manager caches disk pages in a fixed set of frames and
/// vends pinned handles to them. It also acts as the page allocator: page ids
/// are handed out monotonically starting at 1, so id 0 stays reserved as the
/// invalid id.
///
/// Frame reuse prefers the free list, then falls back to LRU-K eviction of an
/// unpinned frame; evicting a dirty frame writes it back through the disk
/// scheduler first.
pub struct BufferPoolManager {
    pool_size: usize,
    next_page_id: AtomicU32,
    frames: Vec<Arc<RwLock<Page>>>,
    page_table: Mutex<HashMap<PageId, FrameId>>,
    free_list: Mutex<Vec<FrameId>>,
    replacer: Mutex<LRUKReplacer>,
    disk_scheduler: DiskScheduler,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, disk_manager: Arc<dyn DiskIO>, replacer: LRUKReplacer) -> Self {
        let frames = (0..pool_size)
            .map(|_| Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))))
            .collect();
        let free_list: Vec<FrameId> = (0..pool_size).collect();
        Self {
            pool_size,
            next_page_id: AtomicU32::new(1),
            frames,
            page_table: Mutex::new(HashMap::with_capacity(pool_size)),
            free_list: Mutex::new(free_list),
            replacer: Mutex::new(replacer),
            disk_scheduler: DiskScheduler::new(disk_manager),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Reserves a fresh page id.
    pub fn allocate_page(&self) -> PageId {
        self.next_page_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Allocates a fresh page, pins it in a frame and returns the guard. The
    /// caller takes the guard's `write` latch to initialize the image; this is
    /// the allocate-with-exclusive-latch primitive the index code builds on.
    pub fn new_page(self: &Arc<Self>) -> Result<PageGuard, BufferPoolError> {
        let mut page_table = self.page_table.lock();
        let frame_id = self.acquire_frame(&mut page_table)?;
        let page_id = self.allocate_page();
        debug!("Allocated page {} into frame {}", page_id, frame_id);

        {
            let mut page = self.frames[frame_id].write();
            page.reset(page_id);
            page.pin();
        }
        page_table.insert(page_id, frame_id);

        let mut replacer = self.replacer.lock();
        replacer.record_access(frame_id, AccessType::Unknown);
        replacer.set_evictable(frame_id, false);

        Ok(PageGuard::new(
            Arc::clone(self),
            Arc::clone(&self.frames[frame_id]),
            page_id,
        ))
    }

    /// Pins the requested page, reading it from disk on a miss.
    pub fn fetch_page(self: &Arc<Self>, page_id: PageId) -> Result<PageGuard, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::PageNotFound(page_id));
        }

        let mut page_table = self.page_table.lock();
        if let Some(&frame_id) = page_table.get(&page_id) {
            self.frames[frame_id].read().pin();
            let mut replacer = self.replacer.lock();
            replacer.record_access(frame_id, AccessType::Lookup);
            replacer.set_evictable(frame_id, false);
            return Ok(PageGuard::new(
                Arc::clone(self),
                Arc::clone(&self.frames[frame_id]),
                page_id,
            ));
        }

        let frame_id = self.acquire_frame(&mut page_table)?;
        let data = match self.read_from_disk(page_id) {
            Ok(data) => data,
            Err(e) => {
                // The frame was never published; hand it back.
                self.free_list.lock().push(frame_id);
                return Err(e);
            }
        };

        {
            let mut page = self.frames[frame_id].write();
            page.reset(page_id);
            page.data_mut().copy_from_slice(&data[..]);
            page.set_dirty(false);
            page.pin();
        }
        page_table.insert(page_id, frame_id);

        let mut replacer = self.replacer.lock();
        replacer.record_access(frame_id, AccessType::Lookup);
        replacer.set_evictable(frame_id, false);

        Ok(PageGuard::new(
            Arc::clone(self),
            Arc::clone(&self.frames[frame_id]),
            page_id,
        ))
    }

    /// Releases one pin on a resident page. Called from `PageGuard::drop`.
    pub(crate) fn unpin_page(&self, page_id: PageId) {
        let page_table = self.page_table.lock();
        match page_table.get(&page_id) {
            Some(&frame_id) => {
                let remaining = self.frames[frame_id].read().unpin();
                if remaining == 0 {
                    self.replacer.lock().set_evictable(frame_id, true);
                }
            }
            None => warn!("unpin of non-resident page {}", page_id),
        }
    }

    /// Writes a resident page back to disk and clears its dirty flag.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let page_table = self.page_table.lock();
        let &frame_id = page_table
            .get(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        let data = {
            let page = self.frames[frame_id].read();
            Box::new(*page.data())
        };
        self.write_to_disk(page_id, data)?;
        self.frames[frame_id].read().set_dirty(false);
        Ok(())
    }

    /// Flushes every resident page.
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let resident: Vec<PageId> = self.page_table.lock().keys().copied().collect();
        for page_id in resident {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Frees a page. The frame (if any) goes back on the free list; the
    /// caller is responsible for never referencing the id again. Freed ids
    /// are not recycled by `allocate_page`.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut page_table = self.page_table.lock();
        match page_table.get(&page_id) {
            Some(&frame_id) => {
                if self.frames[frame_id].read().pin_count() > 0 {
                    return Err(BufferPoolError::PagePinned(page_id));
                }
                page_table.remove(&page_id);
                self.replacer.lock().remove(frame_id);
                self.frames[frame_id].write().reset(INVALID_PAGE_ID);
                self.free_list.lock().push(frame_id);
            }
            None => debug!("delete of non-resident page {}; nothing to evict", page_id),
        }
        Ok(())
    }

    /// Picks a usable frame: free list first, then LRU-K eviction. A dirty
    /// victim is written back before its frame is reused. Must be called with
    /// the page table locked.
    fn acquire_frame(
        &self,
        page_table: &mut HashMap<PageId, FrameId>,
    ) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = self.free_list.lock().pop() {
            return Ok(frame_id);
        }

        let frame_id = self
            .replacer
            .lock()
            .evict()
            .ok_or(BufferPoolError::NoFreeFrame)?;

        let old_page_id = page_table
            .iter()
            .find_map(|(&page_id, &fid)| (fid == frame_id).then_some(page_id));
        if let Some(old_page_id) = old_page_id {
            let dirty_data = {
                let page = self.frames[frame_id].read();
                page.is_dirty().then(|| Box::new(*page.data()))
            };
            if let Some(data) = dirty_data {
                debug!("Evicting dirty page {} from frame {}", old_page_id, frame_id);
                if let Err(e) = self.write_to_disk(old_page_id, data) {
                    // Leave the victim resident and evictable; the caller
                    // sees the failure.
                    let mut replacer = self.replacer.lock();
                    replacer.record_access(frame_id, AccessType::Unknown);
                    replacer.set_evictable(frame_id, true);
                    return Err(e);
                }
                self.frames[frame_id].read().set_dirty(false);
            }
            page_table.remove(&old_page_id);
        }
        Ok(frame_id)
    }

    fn read_from_disk(&self, page_id: PageId) -> Result<Box<[u8; DB_PAGE_SIZE]>, BufferPoolError> {
        let buffer = Arc::new(Mutex::new(Box::new([0u8; DB_PAGE_SIZE])));
        let receiver = self.disk_scheduler.schedule(false, Arc::clone(&buffer), page_id);
        receiver
            .recv()
            .map_err(|_| scheduler_gone())??;
        let data = buffer.lock().clone();
        Ok(data)
    }

    fn write_to_disk(&self, page_id: PageId, data: Box<[u8; DB_PAGE_SIZE]>) -> Result<(), BufferPoolError> {
        let buffer = Arc::new(Mutex::new(data));
        let receiver = self.disk_scheduler.schedule(true, buffer, page_id);
        receiver
            .recv()
            .map_err(|_| scheduler_gone())??;
        Ok(())
    }
}

fn scheduler_gone() -> BufferPoolError {
    BufferPoolError::Io(Error::new(
        ErrorKind::BrokenPipe,
        "disk scheduler terminated before completing the request",
    ))
}
