use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use log::error;

use crate::common::config::{PageId, DB_PAGE_SIZE};

/// Page is the basic unit of storage within the database system. It wraps the
/// raw byte image of one disk page together with the book-keeping used by the
/// buffer pool manager: page id, pin count and dirty flag. The pin count and
/// dirty flag are atomic so they can be updated without holding the page
/// latch; the byte image is protected by the `RwLock` the buffer pool wraps
/// every frame in.
pub struct Page {
    /// The actual data that is stored within the page.
    data: Box<[u8; DB_PAGE_SIZE]>,
    /// The ID of this page.
    page_id: PageId,
    /// The pin count of this page.
    pin_count: AtomicU32,
    /// True if the page has been modified since it was read from disk.
    is_dirty: AtomicBool,
}

impl Page {
    /// Constructor. Zeroes out the page data.
    pub fn new(page_id: PageId) -> Self {
        Page {
            data: Box::new([0; DB_PAGE_SIZE]),
            page_id,
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    /// Returns the page id of this page.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns an immutable reference to the page image.
    pub fn data(&self) -> &[u8; DB_PAGE_SIZE] {
        &self.data
    }

    /// Returns a mutable reference to the page image and marks the page dirty.
    pub fn data_mut(&mut self) -> &mut [u8; DB_PAGE_SIZE] {
        self.is_dirty.store(true, Ordering::SeqCst);
        &mut self.data
    }

    /// Returns true if the page is dirty.
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::SeqCst)
    }

    /// Sets the dirty flag of this page.
    pub fn set_dirty(&self, is_dirty: bool) {
        self.is_dirty.store(is_dirty, Ordering::SeqCst);
    }

    /// Returns the pin count of this page.
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::SeqCst)
    }

    /// Increments the pin count and returns the new value.
    pub(crate) fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decrements the pin count and returns the new value.
    pub(crate) fn unpin(&self) -> u32 {
        let previous = self.pin_count.fetch_sub(1, Ordering::SeqCst);
        if previous == 0 {
            error!("Attempted to unpin page {} below 0", self.page_id);
            self.pin_count.store(0, Ordering::SeqCst);
            return 0;
        }
        previous - 1
    }

    /// Reassigns the frame to a new page identity and zeroes the image.
    pub(crate) fn reset(&mut self, page_id: PageId) {
        self.data.fill(0);
        self.page_id = page_id;
        self.pin_count.store(0, Ordering::SeqCst);
        self.is_dirty.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::INVALID_PAGE_ID;

    #[test]
    fn test_pin_unpin() {
        let page = Page::new(5);
        assert_eq!(page.pin_count(), 0);
        assert_eq!(page.pin(), 1);
        assert_eq!(page.pin(), 2);
        assert_eq!(page.unpin(), 1);
        assert_eq!(page.unpin(), 0);
        assert_eq!(page.unpin(), 0);
    }

    #[test]
    fn test_data_mut_marks_dirty() {
        let mut page = Page::new(5);
        assert!(!page.is_dirty());
        page.data_mut()[0] = 1;
        assert!(page.is_dirty());

        page.reset(INVALID_PAGE_ID);
        assert!(!page.is_dirty());
        assert_eq!(page.data()[0], 0);
        assert_eq!(page.page_id(), INVALID_PAGE_ID);
    }
}
