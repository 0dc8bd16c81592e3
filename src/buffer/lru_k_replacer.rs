use std::collections::{HashMap, VecDeque};

use log::warn;

use crate::common::config::FrameId;

#[derive(Clone, Copy)]
pub enum AccessType {
    Unknown = 0,
    Lookup,
    Scan,
    Index,
}

struct FrameInfo {
    access_times: VecDeque<u64>,
    is_evictable: bool,
}

/// LRU-K eviction policy: the victim is the evictable frame whose k-th most
/// recent access lies furthest in the past. Frames with fewer than `k`
/// recorded accesses have infinite backward distance and are preferred,
/// oldest first access winning ties.
pub struct LRUKReplacer {
    frame_store: HashMap<FrameId, FrameInfo>,
    current_timestamp: u64,
    curr_size: usize,
    replacer_size: usize,
    k: usize,
}

impl LRUKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        Self {
            frame_store: HashMap::with_capacity(num_frames),
            current_timestamp: 0,
            curr_size: 0,
            replacer_size: num_frames,
            k,
        }
    }

    pub fn evict(&mut self) -> Option<FrameId> {
        let mut victim: Option<(FrameId, bool, u64)> = None;

        for (&frame_id, frame) in self.frame_store.iter() {
            if !frame.is_evictable {
                continue;
            }
            // (infinite distance, first access) orders frames with short
            // history; otherwise compare the k-th most recent access.
            let (infinite, key) = if frame.access_times.len() < self.k {
                (true, *frame.access_times.front().unwrap_or(&0))
            } else {
                (false, frame.access_times[frame.access_times.len() - self.k])
            };
            let better = match victim {
                None => true,
                Some((_, v_infinite, v_key)) => match (infinite, v_infinite) {
                    (true, false) => true,
                    (false, true) => false,
                    _ => key < v_key,
                },
            };
            if better {
                victim = Some((frame_id, infinite, key));
            }
        }

        victim.map(|(frame_id, _, _)| {
            self.frame_store.remove(&frame_id);
            self.curr_size -= 1;
            frame_id
        })
    }

    pub fn record_access(&mut self, frame_id: FrameId, _access_type: AccessType) {
        self.current_timestamp += 1;
        let now = self.current_timestamp;
        let k = self.k;

        let frame = self.frame_store.entry(frame_id).or_insert_with(|| FrameInfo {
            access_times: VecDeque::with_capacity(k),
            is_evictable: false,
        });
        if frame.access_times.len() == k {
            frame.access_times.pop_front();
        }
        frame.access_times.push_back(now);
    }

    pub fn set_evictable(&mut self, frame_id: FrameId, set_evictable: bool) {
        match self.frame_store.get_mut(&frame_id) {
            Some(frame) => {
                match (frame.is_evictable, set_evictable) {
                    (false, true) => self.curr_size += 1,
                    (true, false) => self.curr_size -= 1,
                    _ => {}
                }
                frame.is_evictable = set_evictable;
            }
            None => warn!("set_evictable on untracked frame {}", frame_id),
        }
    }

    pub fn remove(&mut self, frame_id: FrameId) {
        if let Some(frame) = self.frame_store.remove(&frame_id) {
            if frame.is_evictable {
                self.curr_size -= 1;
            } else {
                warn!("removed non-evictable frame {} from replacer", frame_id);
            }
        }
    }

    pub fn size(&self) -> usize {
        self.curr_size
    }

    pub fn replacer_size(&self) -> usize {
        self.replacer_size
    }
}
