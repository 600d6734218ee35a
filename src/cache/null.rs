use std::marker::PhantomData;
use std::sync::Arc;

use super::{CacheStats, FilesCache, StatsRecorder};
use crate::handle::FileHandle;
use crate::name::{FileName, FileSystemId};

/// A cache that stores nothing.
///
/// Resolving the same path twice yields two independent handles with their
/// own lifecycle state.
pub struct NullCache<H> {
    stats: StatsRecorder,
    _marker: PhantomData<fn() -> H>,
}

impl<H> NullCache<H> {
    pub fn new() -> Self {
        NullCache {
            stats: StatsRecorder::default(),
            _marker: PhantomData,
        }
    }
}

impl<H> Default for NullCache<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: FileHandle> FilesCache<H> for NullCache<H> {
    fn put(&self, _handle: &Arc<H>) {}

    fn put_if_absent(&self, _handle: &Arc<H>) -> bool {
        false
    }

    fn stores_entries(&self) -> bool {
        false
    }

    fn get(&self, _filesystem: FileSystemId, _name: &FileName) -> Option<Arc<H>> {
        self.stats.lookup(false);
        None
    }

    fn remove(&self, _filesystem: FileSystemId, _name: &FileName) {}

    fn touch(&self, _handle: &Arc<H>) {}

    fn clear(&self, _filesystem: FileSystemId) {}

    fn shutdown(&self) {}

    fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}
