use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io::Result as IoResult;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use log::warn;

use crate::common::config::{PageId, DB_PAGE_SIZE};
use crate::storage::disk::disk_manager::DiskIO;

pub struct DiskRequest {
    is_write: bool,
    data: Arc<Mutex<Box<[u8; DB_PAGE_SIZE]>>>,
    page_id: PageId,
    sender: mpsc::Sender<IoResult<()>>,
}

struct SchedulerState {
    queue: VecDeque<DiskRequest>,
    stopped: bool,
}

struct SchedulerShared {
    state: Mutex<SchedulerState>,
    cvar: Condvar,
    disk_manager: Arc<dyn DiskIO>,
}

/// Serializes page reads and writes onto a background worker thread. Callers
/// block on the returned channel until their request completes.
pub struct DiskScheduler {
    shared: Arc<SchedulerShared>,
    worker_thread: Option<thread::JoinHandle<()>>,
}

impl DiskScheduler {
    pub fn new(disk_manager: Arc<dyn DiskIO>) -> Self {
        let shared = Arc::new(SchedulerShared {
            state: Mutex::new(SchedulerState {
                queue: VecDeque::new(),
                stopped: false,
            }),
            cvar: Condvar::new(),
            disk_manager,
        });

        let worker_shared = Arc::clone(&shared);
        let worker_thread = thread::spawn(move || Self::worker_loop(worker_shared));

        Self {
            shared,
            worker_thread: Some(worker_thread),
        }
    }

    /// Enqueues a request and returns the channel its completion is signalled on.
    pub fn schedule(
        &self,
        is_write: bool,
        data: Arc<Mutex<Box<[u8; DB_PAGE_SIZE]>>>,
        page_id: PageId,
    ) -> mpsc::Receiver<IoResult<()>> {
        let (sender, receiver) = mpsc::channel();
        let request = DiskRequest {
            is_write,
            data,
            page_id,
            sender,
        };

        let mut state = self.shared.state.lock();
        if state.stopped {
            warn!("Request for page {} scheduled after shutdown", page_id);
            drop(state);
            return receiver;
        }
        state.queue.push_back(request);
        drop(state);
        self.shared.cvar.notify_one();

        receiver
    }

    fn worker_loop(shared: Arc<SchedulerShared>) {
        loop {
            let request = {
                let mut state = shared.state.lock();
                loop {
                    if let Some(request) = state.queue.pop_front() {
                        break request;
                    }
                    if state.stopped {
                        return;
                    }
                    shared.cvar.wait(&mut state);
                }
            };

            let result = {
                let mut data = request.data.lock();
                if request.is_write {
                    shared.disk_manager.write_page(request.page_id, &data)
                } else {
                    shared.disk_manager.read_page(request.page_id, &mut data)
                }
            };
            // The receiver may have given up; losing the notification is fine.
            let _ = request.sender.send(result);
        }
    }

    pub fn shut_down(&self) {
        let mut state = self.shared.state.lock();
        state.stopped = true;
        drop(state);
        self.shared.cvar.notify_all();
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.shut_down();
        if let Some(handle) = self.worker_thread.take() {
            let _ = handle.join();
        }
    }
}
