use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{report_empty, CacheStats, FilesCache, PartitionRegistry, StatsRecorder};
use crate::handle::FileHandle;
use crate::name::{FileName, FileSystemId};

/// Keeps every handle until it is removed or its filesystem is cleared.
///
/// Each filesystem gets its own concurrent map. Inner maps are only touched
/// while a guard on the outer map is held, so an emptied partition can be
/// unlinked without racing a concurrent insert into it.
pub struct UnboundedCache<H> {
    partitions: DashMap<FileSystemId, DashMap<FileName, Arc<H>>>,
    registry: Option<Arc<dyn PartitionRegistry>>,
    closed: AtomicBool,
    stats: StatsRecorder,
}

impl<H: FileHandle> UnboundedCache<H> {
    pub fn new(registry: Option<Arc<dyn PartitionRegistry>>) -> Self {
        UnboundedCache {
            partitions: DashMap::new(),
            registry,
            closed: AtomicBool::new(false),
            stats: StatsRecorder::default(),
        }
    }

    /// Run `f` on the filesystem's map, creating it if needed.
    fn with_partition<R>(
        &self,
        fs: FileSystemId,
        f: impl FnOnce(&DashMap<FileName, Arc<H>>) -> R,
    ) -> R {
        if let Some(files) = self.partitions.get(&fs) {
            return f(files.value());
        }
        let files = self.partitions.entry(fs).or_default();
        f(files.value())
    }

    /// Number of cached handles for one filesystem.
    pub fn partition_len(&self, fs: FileSystemId) -> usize {
        self.partitions.get(&fs).map_or(0, |files| files.len())
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl<H: FileHandle> FilesCache<H> for UnboundedCache<H> {
    fn put(&self, handle: &Arc<H>) {
        if self.is_closed() {
            return;
        }
        let fs = handle.filesystem();
        let name = handle.name().clone();
        tracing::debug!("put: {}", name.friendly_uri());

        let replaced = self.with_partition(fs, |files| files.insert(name.clone(), handle.clone()));
        drop(replaced);
        self.stats.put();

        if self.is_closed() {
            self.remove(fs, &name);
        }
    }

    fn put_if_absent(&self, handle: &Arc<H>) -> bool {
        if self.is_closed() {
            return false;
        }
        let fs = handle.filesystem();
        let name = handle.name().clone();

        let inserted = self.with_partition(fs, |files| match files.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(handle.clone());
                true
            }
        });
        if inserted {
            self.stats.put();
            if self.is_closed() {
                self.remove(fs, &name);
                return false;
            }
        }
        inserted
    }

    fn get(&self, filesystem: FileSystemId, name: &FileName) -> Option<Arc<H>> {
        // Avoid creating a partition just to miss in it.
        let found = self.partitions.get(&filesystem).and_then(|files| {
            let handle = files.get(name).map(|h| h.value().clone());
            handle
        });
        self.stats.lookup(found.is_some());
        found
    }

    fn remove(&self, filesystem: FileSystemId, name: &FileName) {
        let removed = match self.partitions.get(&filesystem) {
            Some(files) => files.remove(name),
            None => return,
        };
        if removed.is_none() {
            return;
        }
        tracing::debug!("remove: {}", name.friendly_uri());

        let unlinked = self
            .partitions
            .remove_if(&filesystem, |_, files| files.is_empty())
            .is_some();
        drop(removed);
        if unlinked {
            report_empty(&self.registry, filesystem);
        }
    }

    fn touch(&self, _handle: &Arc<H>) {}

    fn clear(&self, filesystem: FileSystemId) {
        if let Some((_, files)) = self.partitions.remove(&filesystem) {
            tracing::debug!("Cleared {} cached handles for {}", files.len(), filesystem);
        }
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.partitions.clear();
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}
