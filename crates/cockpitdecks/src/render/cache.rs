use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::{
        Arc, Mutex, OnceLock, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::{DashMap, mapref::entry::Entry};
use tracing::debug;

use super::{Fingerprint, RenderedFrame};

struct CacheEntry {
    cell: Arc<OnceLock<Arc<RenderedFrame>>>,
    /// Controls whose recent list holds this fingerprint
    users: usize,
}

impl CacheEntry {
    fn new() -> Self {
        Self {
            cell: Arc::new(OnceLock::new()),
            users: 0,
        }
    }
}

/// Shared fingerprint to frame map.
///
/// Each fingerprint is rendered at most once while it is cached: concurrent
/// requests for a fingerprint being drawn wait for that drawing. Every control
/// keeps its `per_control` most recent fingerprints; a frame leaves the cache
/// once no control keeps it.
pub struct FrameCache {
    frames: DashMap<Fingerprint, CacheEntry>,
    recent: Mutex<HashMap<String, VecDeque<Fingerprint>>>,
    per_control: usize,
    renders: AtomicU64,
}

impl fmt::Debug for FrameCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameCache [{} frames]", self.frames.len())
    }
}

impl FrameCache {
    /// Cache keeping `per_control` fingerprints per control (at least one)
    pub fn new(per_control: usize) -> Self {
        Self {
            frames: DashMap::new(),
            recent: Mutex::new(HashMap::new()),
            per_control: per_control.max(1),
            renders: AtomicU64::new(0),
        }
    }

    /// The frame for `fingerprint`, drawn with `render` if nobody did yet
    pub fn get_or_render(
        &self,
        owner: &str,
        fingerprint: Fingerprint,
        render: impl FnOnce() -> RenderedFrame,
    ) -> Arc<RenderedFrame> {
        let cell = self.touch(owner, fingerprint);
        cell.get_or_init(|| {
            self.renders.fetch_add(1, Ordering::Relaxed);
            Arc::new(render())
        })
        .clone()
    }

    /// Mark `fingerprint` as recently used by `owner` and return its slot
    fn touch(&self, owner: &str, fingerprint: Fingerprint) -> Arc<OnceLock<Arc<RenderedFrame>>> {
        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        let list = recent.entry(owner.to_string()).or_default();

        let mut evicted = None;
        if let Some(at) = list.iter().position(|f| *f == fingerprint) {
            list.remove(at);
            list.push_back(fingerprint);
        } else {
            list.push_back(fingerprint);
            self.frames.entry(fingerprint).or_insert_with(CacheEntry::new).users += 1;
            if list.len() > self.per_control {
                evicted = list.pop_front();
            }
        }

        if let Some(old) = evicted {
            self.release(old);
        }

        // held by `owner`, so present
        self.frames
            .entry(fingerprint)
            .or_insert_with(|| {
                let mut entry = CacheEntry::new();
                entry.users = 1;
                entry
            })
            .cell
            .clone()
    }

    fn release(&self, fingerprint: Fingerprint) {
        if let Entry::Occupied(mut entry) = self.frames.entry(fingerprint) {
            entry.get_mut().users = entry.get().users.saturating_sub(1);
            if entry.get().users == 0 {
                entry.remove();
                debug!("Evicted frame {}", fingerprint);
            }
        }
    }

    /// Drop everything `owner` was keeping
    pub fn forget(&self, owner: &str) {
        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = recent.remove(owner) {
            for fingerprint in list {
                self.release(fingerprint);
            }
        }
    }

    /// Cached frame for a fingerprint, without touching recency
    pub fn get(&self, fingerprint: Fingerprint) -> Option<Arc<RenderedFrame>> {
        self.frames.get(&fingerprint)?.cell.get().cloned()
    }

    /// Frames currently cached
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames drawn so far
    pub fn renders(&self) -> u64 {
        self.renders.load(Ordering::Relaxed)
    }
}
