use log::{debug, error, info, trace};
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::Result as IoResult;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::common::config::{PageId, DB_PAGE_SIZE};

/// The `DiskIO` trait defines the basic operations for interacting with disk storage.
/// Implementers of this trait must provide methods to write and read pages.
pub trait DiskIO: Send + Sync {
    fn write_page(&self, page_id: PageId, page_data: &[u8; DB_PAGE_SIZE]) -> IoResult<()>;
    fn read_page(&self, page_id: PageId, page_data: &mut [u8; DB_PAGE_SIZE]) -> IoResult<()>;
}

/// The `FileDiskManager` stores pages in a single database file, addressed by
/// page id times the page size. Reads past the end of the file zero-fill the
/// buffer so that never-written pages come back as empty images.
pub struct FileDiskManager {
    file_name: PathBuf,
    db_io: Mutex<File>,
    num_flushes: AtomicU64,
    num_writes: AtomicU64,
}

impl FileDiskManager {
    /// Opens (or creates) the database file at `db_file`.
    pub fn new(db_file: impl AsRef<Path>) -> IoResult<Self> {
        let file_name = db_file.as_ref().to_path_buf();
        let db_io = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&file_name)?;
        info!("Opened database file {:?}", file_name);

        Ok(Self {
            file_name,
            db_io: Mutex::new(db_io),
            num_flushes: AtomicU64::new(0),
            num_writes: AtomicU64::new(0),
        })
    }

    /// Flushes any buffered data to disk before shutdown.
    pub fn shut_down(&self) -> IoResult<()> {
        let mut db_io = self.db_io.lock();
        db_io.flush()?;
        db_io.sync_all()?;
        info!("Shutdown complete for {:?}", self.file_name);
        Ok(())
    }

    /// Returns the number of page flushes performed by the disk manager.
    pub fn get_num_flushes(&self) -> u64 {
        self.num_flushes.load(Ordering::SeqCst)
    }

    /// Returns the number of page writes performed by the disk manager.
    pub fn get_num_writes(&self) -> u64 {
        self.num_writes.load(Ordering::SeqCst)
    }

    /// Retrieves the size of the backing file in bytes.
    pub fn get_file_size(&self) -> IoResult<u64> {
        Ok(self.file_name.metadata()?.len())
    }
}

impl DiskIO for FileDiskManager {
    fn write_page(&self, page_id: PageId, page_data: &[u8; DB_PAGE_SIZE]) -> IoResult<()> {
        let offset = page_id as u64 * DB_PAGE_SIZE as u64;
        trace!("Writing page {} at offset {}", page_id, offset);

        let mut db_io = self.db_io.lock();
        db_io.seek(SeekFrom::Start(offset))?;
        db_io.write_all(page_data)?;
        db_io.flush()?;
        self.num_writes.fetch_add(1, Ordering::SeqCst);
        self.num_flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_page(&self, page_id: PageId, page_data: &mut [u8; DB_PAGE_SIZE]) -> IoResult<()> {
        let offset = page_id as u64 * DB_PAGE_SIZE as u64;
        trace!("Reading page {} at offset {}", page_id, offset);

        let mut db_io = self.db_io.lock();
        let file_len = db_io.metadata()?.len();
        if offset >= file_len {
            // Never-written page: report an empty image.
            page_data.fill(0);
            return Ok(());
        }

        db_io.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        while total < DB_PAGE_SIZE {
            match db_io.read(&mut page_data[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) => {
                    error!("Failed to read page {} at offset {}: {}", page_id, offset, e);
                    return Err(e);
                }
            }
        }
        if total < DB_PAGE_SIZE {
            debug!(
                "Short read on page {} ({} of {} bytes), zero-filling the remainder",
                page_id, total, DB_PAGE_SIZE
            );
            page_data[total..].fill(0);
        }
        Ok(())
    }
}

/// `DiskManagerMemory` replicates the utility of `FileDiskManager` on memory.
/// It is primarily used for data structure performance testing.
pub struct DiskManagerMemory {
    memory: RwLock<Vec<u8>>,
}

impl DiskManagerMemory {
    pub fn new(num_pages: usize) -> Self {
        Self {
            memory: RwLock::new(vec![0; num_pages * DB_PAGE_SIZE]),
        }
    }
}

impl DiskIO for DiskManagerMemory {
    fn write_page(&self, page_id: PageId, page_data: &[u8; DB_PAGE_SIZE]) -> IoResult<()> {
        let offset = page_id as usize * DB_PAGE_SIZE;

        let mut memory = self.memory.write();
        if memory.len() < offset + DB_PAGE_SIZE {
            memory.resize(offset + DB_PAGE_SIZE, 0);
        }
        memory[offset..offset + DB_PAGE_SIZE].copy_from_slice(page_data);
        Ok(())
    }

    fn read_page(&self, page_id: PageId, page_data: &mut [u8; DB_PAGE_SIZE]) -> IoResult<()> {
        let offset = page_id as usize * DB_PAGE_SIZE;

        let memory = self.memory.read();
        if offset + DB_PAGE_SIZE <= memory.len() {
            page_data.copy_from_slice(&memory[offset..offset + DB_PAGE_SIZE]);
        } else {
            page_data.fill(0);
        }
        Ok(())
    }
}
