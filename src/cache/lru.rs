use std::num::NonZeroUsize;
use std::sync::Arc;

use super::partition::{PartitionEntries, PartitionMap};
use super::{report_empty, CacheStats, FilesCache, PartitionRegistry, StatsRecorder};
use crate::error::{CacheError, Result};
use crate::handle::FileHandle;
use crate::name::{FileName, FileSystemId};

pub const DEFAULT_LRU_CAPACITY: usize = 100;

/// One filesystem's entries in recency order.
///
/// The underlying map is unbounded; capacity is enforced by
/// [`LruEntries::evict_over`] so that pinned handles can be skipped.
struct LruEntries<H> {
    files: ::lru::LruCache<FileName, Arc<H>>,
}

impl<H> Default for LruEntries<H> {
    fn default() -> Self {
        LruEntries {
            files: ::lru::LruCache::unbounded(),
        }
    }
}

impl<H> PartitionEntries for LruEntries<H> {
    fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

struct Eviction<H> {
    victims: Vec<Arc<H>>,
    vetoed: u64,
}

impl<H: FileHandle> LruEntries<H> {
    /// Pop least recently used entries until the partition fits `capacity`.
    ///
    /// Bound or content-open handles are never chosen, nor is `keep` (the entry
    /// being inserted). When too few candidates exist the partition stays over
    /// capacity.
    fn evict_over(&mut self, capacity: usize, keep: &FileName) -> Eviction<H> {
        let excess = self.files.len().saturating_sub(capacity);
        let mut eviction = Eviction {
            victims: Vec::new(),
            vetoed: 0,
        };
        if excess == 0 {
            return eviction;
        }

        let mut chosen: Vec<FileName> = Vec::with_capacity(excess);
        for (name, handle) in self.files.iter().rev() {
            if chosen.len() == excess {
                break;
            }
            if name == keep {
                continue;
            }
            if handle.is_bound() || handle.is_content_open() {
                tracing::debug!("Eviction vetoed for {}", name.friendly_uri());
                eviction.vetoed += 1;
                continue;
            }
            chosen.push(name.clone());
        }

        eviction.victims = chosen
            .iter()
            .filter_map(|name| self.files.pop(name))
            .collect();
        eviction
    }
}

/// Bounded per-filesystem cache with least-recently-used eviction.
///
/// Entries whose handle is bound or content-open are pinned: eviction skips
/// them, so a partition may temporarily hold more than `capacity` entries.
/// Evicted handles are detached.
pub struct LruCache<H> {
    capacity: NonZeroUsize,
    partitions: PartitionMap<LruEntries<H>>,
    registry: Option<Arc<dyn PartitionRegistry>>,
    stats: StatsRecorder,
}

impl<H: FileHandle> LruCache<H> {
    /// Cache holding up to [`DEFAULT_LRU_CAPACITY`] handles per filesystem.
    pub fn new(registry: Option<Arc<dyn PartitionRegistry>>) -> Self {
        LruCache {
            capacity: NonZeroUsize::new(DEFAULT_LRU_CAPACITY).expect("default capacity is non-zero"),
            partitions: PartitionMap::new(),
            registry,
            stats: StatsRecorder::default(),
        }
    }

    pub fn with_capacity(
        capacity: usize,
        registry: Option<Arc<dyn PartitionRegistry>>,
    ) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            CacheError::Config("LRU capacity must be a positive integer".to_string())
        })?;
        Ok(LruCache {
            capacity,
            ..Self::new(registry)
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Existence check that does not change recency.
    pub fn contains(&self, fs: FileSystemId, name: &FileName) -> bool {
        self.partitions
            .read(fs, |entries| entries.files.contains(name))
            .unwrap_or(false)
    }

    pub fn partition_len(&self, fs: FileSystemId) -> usize {
        self.partitions
            .read(fs, |entries| entries.files.len())
            .unwrap_or(0)
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    fn insert(&self, handle: &Arc<H>, only_if_absent: bool) -> bool {
        let fs = handle.filesystem();
        let name = handle.name().clone();
        let capacity = self.capacity.get();

        let visit = self.partitions.write(fs, true, |entries| {
            if only_if_absent && entries.files.contains(&name) {
                return None;
            }
            let replaced = entries.files.put(name.clone(), handle.clone());
            let eviction = if replaced.is_none() {
                entries.evict_over(capacity, &name)
            } else {
                Eviction {
                    victims: Vec::new(),
                    vetoed: 0,
                }
            };
            Some((replaced, eviction))
        });

        let Some(visit) = visit else {
            return false;
        };
        let Some((replaced, eviction)) = visit.value else {
            return false;
        };
        drop(replaced);
        self.stats.put();
        tracing::debug!("put: {}", name.friendly_uri());

        self.stats.vetoed(eviction.vetoed);
        if !eviction.victims.is_empty() {
            self.stats.evicted(eviction.victims.len() as u64);
            for victim in eviction.victims {
                tracing::debug!("Evicting {}", victim.name().friendly_uri());
                if let Err(e) = victim.detach() {
                    tracing::warn!(
                        "Failed to detach evicted handle {}: {}",
                        victim.name().friendly_uri(),
                        e
                    );
                }
            }
            if visit.emptied {
                report_empty(&self.registry, fs);
            }
        }
        true
    }
}

impl<H: FileHandle> FilesCache<H> for LruCache<H> {
    fn put(&self, handle: &Arc<H>) {
        self.insert(handle, false);
    }

    fn put_if_absent(&self, handle: &Arc<H>) -> bool {
        self.insert(handle, true)
    }

    fn get(&self, filesystem: FileSystemId, name: &FileName) -> Option<Arc<H>> {
        // Promotion reorders the partition, so even lookups take the write lock.
        let found = self
            .partitions
            .write(filesystem, false, |entries| entries.files.get(name).cloned())
            .and_then(|visit| visit.value);
        self.stats.lookup(found.is_some());
        found
    }

    fn remove(&self, filesystem: FileSystemId, name: &FileName) {
        let Some(visit) = self
            .partitions
            .write(filesystem, false, |entries| entries.files.pop(name))
        else {
            return;
        };
        if visit.value.is_some() {
            tracing::debug!("remove: {}", name.friendly_uri());
            drop(visit.value);
            if visit.emptied {
                report_empty(&self.registry, filesystem);
            }
        }
    }

    fn touch(&self, handle: &Arc<H>) {
        self.partitions.write(handle.filesystem(), false, |entries| {
            entries.files.promote(handle.name());
        });
    }

    fn clear(&self, filesystem: FileSystemId) {
        if let Some(entries) = self.partitions.take(filesystem) {
            tracing::debug!(
                "Cleared {} cached handles for {}",
                entries.files.len(),
                filesystem
            );
        }
    }

    fn shutdown(&self) {
        let drained = self.partitions.close();
        if !drained.is_empty() {
            tracing::debug!("Released {} LRU cache partitions", drained.len());
        }
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{HandleState, ReclaimHook};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Probe {
        fs: FileSystemId,
        name: FileName,
        state: HandleState,
        detached: AtomicUsize,
    }

    impl FileHandle for Probe {
        fn filesystem(&self) -> FileSystemId {
            self.fs
        }
        fn name(&self) -> &FileName {
            &self.name
        }
        fn is_bound(&self) -> bool {
            self.state.is_bound()
        }
        fn is_content_open(&self) -> bool {
            self.state.is_content_open()
        }
        fn detach(&self) -> Result<()> {
            self.detached.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Backend("connection reset".to_string()))
        }
        fn reclaim_hook(&self) -> &ReclaimHook {
            self.state.hook()
        }
    }

    fn probe(fs: FileSystemId, path: &str) -> Arc<Probe> {
        Arc::new(Probe {
            fs,
            name: FileName::new("ram", path).unwrap(),
            state: HandleState::new(),
            detached: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            LruCache::<Probe>::with_capacity(0, None),
            Err(CacheError::Config(_))
        ));
        assert_eq!(LruCache::<Probe>::new(None).capacity(), DEFAULT_LRU_CAPACITY);
    }

    #[test]
    fn test_detach_failure_does_not_fail_insert() {
        let cache = LruCache::with_capacity(1, None).unwrap();
        let fs = FileSystemId::next();
        let a = probe(fs, "/a");
        let b = probe(fs, "/b");

        cache.put(&a);
        assert!(cache.put_if_absent(&b));

        assert_eq!(a.detached.load(Ordering::SeqCst), 1);
        assert!(cache.get(fs, a.name()).is_none());
        assert!(cache.get(fs, b.name()).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_contains_does_not_promote() {
        let cache = LruCache::with_capacity(2, None).unwrap();
        let fs = FileSystemId::next();
        let a = probe(fs, "/a");
        let b = probe(fs, "/b");
        let c = probe(fs, "/c");

        cache.put(&a);
        cache.put(&b);
        assert!(cache.contains(fs, a.name()));
        cache.put(&c);

        assert!(!cache.contains(fs, a.name()));
        assert!(cache.contains(fs, b.name()));
        assert_eq!(cache.partition_len(fs), 2);
    }

    #[test]
    fn test_all_pinned_grows_past_capacity() {
        let cache = LruCache::with_capacity(2, None).unwrap();
        let fs = FileSystemId::next();
        let handles: Vec<_> = (0..4).map(|i| probe(fs, &format!("/f{}", i))).collect();
        for h in &handles {
            h.state.set_bound(true);
            cache.put(h);
        }

        assert_eq!(cache.partition_len(fs), 4);
        assert!(cache.stats().vetoes > 0);
        assert!(handles
            .iter()
            .all(|h| h.detached.load(Ordering::SeqCst) == 0));
    }
}
