use fxhash::FxHashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;

use crate::cache::reaper::{Notice, RefId};
use crate::error::Result;
use crate::name::{FileName, FileSystemId};

/// A resolved path within one filesystem, as produced by a backend.
///
/// The cache only reads `is_bound`/`is_content_open` and calls `detach` on
/// handles it evicts. Keeping the flags accurate is the backend's job.
pub trait FileHandle: Send + Sync + 'static {
    fn filesystem(&self) -> FileSystemId;

    fn name(&self) -> &FileName;

    /// True once attached to backend state, false after detaching.
    fn is_bound(&self) -> bool;

    /// True while a read or write stream obtained from this handle is open.
    fn is_content_open(&self) -> bool;

    /// Release backend state. Called by the cache on eviction.
    fn detach(&self) -> Result<()>;

    /// Drop any cached metadata so the next access goes back to the backend.
    fn refresh(&self) -> Result<()> {
        Ok(())
    }

    /// Hook fired when the handle value itself is dropped.
    fn reclaim_hook(&self) -> &ReclaimHook;
}

/// Notifies reclaimable caches when the owning handle is dropped.
///
/// This stands in for a garbage collector's reference queue: the last strong
/// `Arc` going away drops the handle, which drops this hook, which sends one
/// `Reclaimed` notice per registered cache. At most one registration is kept
/// per cache instance; a later registration from the same cache replaces the
/// earlier one.
#[derive(Default)]
pub struct ReclaimHook {
    registrations: Mutex<FxHashMap<u64, (Sender<Notice>, RefId)>>,
}

impl ReclaimHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, cache_id: u64, sender: Sender<Notice>, ref_id: RefId) {
        self.registrations.lock().insert(cache_id, (sender, ref_id));
    }

    #[cfg(test)]
    pub(crate) fn registration_count(&self) -> usize {
        self.registrations.lock().len()
    }
}

impl Drop for ReclaimHook {
    fn drop(&mut self) {
        for (_, (sender, ref_id)) in self.registrations.get_mut().drain() {
            // The receiving cache may already be gone.
            let _ = sender.send(Notice::Reclaimed(ref_id));
        }
    }
}

impl std::fmt::Debug for ReclaimHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReclaimHook")
            .field("registrations", &self.registrations.lock().len())
            .finish()
    }
}

/// Lifecycle flags a backend can embed in its handle type.
#[derive(Debug, Default)]
pub struct HandleState {
    bound: AtomicBool,
    open_streams: AtomicUsize,
    hook: ReclaimHook,
}

impl HandleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_bound(&self, bound: bool) {
        self.bound.store(bound, Ordering::Release);
    }

    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::Acquire)
    }

    /// Record that a content stream was opened.
    pub fn open_stream(&self) {
        self.open_streams.fetch_add(1, Ordering::AcqRel);
    }

    /// Record that a content stream was closed. Extra closes are ignored.
    pub fn close_stream(&self) {
        let _ = self
            .open_streams
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn is_content_open(&self) -> bool {
        self.open_streams.load(Ordering::Acquire) > 0
    }

    pub fn hook(&self) -> &ReclaimHook {
        &self.hook
    }
}
