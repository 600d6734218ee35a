//! Caches that never keep a handle alive on their own.
//!
//! Entries hold a [`Weak`] to the handle. When the last strong reference to a
//! handle goes away its [`ReclaimHook`](crate::handle::ReclaimHook) posts a
//! notice to this cache's reaper thread, which removes the entry and, if that
//! empties the partition, reports the filesystem to the registry. Lookups that
//! find a dead entry before the reaper does remove it themselves.

use fxhash::FxHashMap;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use super::partition::PartitionMap;
use super::reaper::{NoticeSink, Reaper, RefId};
use super::{report_empty, CacheStats, FilesCache, PartitionRegistry, StatsRecorder};
use crate::handle::FileHandle;
use crate::name::{CacheKey, FileName, FileSystemId};

pub const DEFAULT_REAPER_POLL: Duration = Duration::from_secs(1);
pub const DEFAULT_SOFT_RETAIN: usize = 64;

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

/// How long an entry survives once callers stop using its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    /// Reclaimed as soon as the last caller drops the handle.
    Weak,
    /// The `retain` most recently used handles are kept alive by the cache;
    /// older ones behave as `Weak`.
    Soft { retain: usize },
}

struct WeakEntry<H> {
    handle: Weak<H>,
    ref_id: RefId,
}

type Entries<H> = FxHashMap<FileName, WeakEntry<H>>;

enum Lookup<H> {
    Hit(Arc<H>),
    Stale,
    Miss,
}

struct Shared<H> {
    id: u64,
    partitions: PartitionMap<Entries<H>>,
    /// Reference id to the key it was issued for. Locked after, never before,
    /// a partition lock.
    reverse: Mutex<FxHashMap<RefId, CacheKey>>,
    retained: Option<Mutex<::lru::LruCache<CacheKey, Arc<H>>>>,
    next_ref: AtomicU64,
    reaper: Reaper,
    registry: Option<Arc<dyn PartitionRegistry>>,
    stats: StatsRecorder,
}

impl<H: FileHandle> Shared<H> {
    fn issue_ref(&self) -> RefId {
        RefId(self.next_ref.fetch_add(1, Ordering::Relaxed))
    }

    /// Install a fresh weak entry for `handle`. Caller holds the partition lock.
    fn install(&self, entries: &mut Entries<H>, key: &CacheKey, handle: &Arc<H>) {
        let ref_id = self.issue_ref();
        handle
            .reclaim_hook()
            .register(self.id, self.reaper.sender(), ref_id);

        let previous = entries.insert(
            key.name.clone(),
            WeakEntry {
                handle: Arc::downgrade(handle),
                ref_id,
            },
        );
        let mut reverse = self.reverse.lock();
        if let Some(previous) = previous {
            reverse.remove(&previous.ref_id);
        }
        reverse.insert(ref_id, key.clone());
    }

    /// Keep `handle` strongly reachable. Checked against the closed flag under
    /// the retention lock, which shutdown takes after closing, so nothing is
    /// retained once shutdown has drained the window.
    fn retain(&self, key: CacheKey, handle: Arc<H>) {
        if let Some(retained) = &self.retained {
            let displaced = {
                let mut retained = retained.lock();
                if self.partitions.is_closed() {
                    return;
                }
                retained.push(key, handle)
            };
            drop(displaced);
        }
    }

    fn release(&self, key: &CacheKey) {
        if let Some(retained) = &self.retained {
            let released = retained.lock().pop(key);
            drop(released);
        }
    }

    fn release_filesystem(&self, fs: FileSystemId) {
        let Some(retained) = &self.retained else {
            return;
        };
        let released: Vec<Arc<H>> = {
            let mut retained = retained.lock();
            let keys: Vec<CacheKey> = retained
                .iter()
                .filter(|(key, _)| key.filesystem == fs)
                .map(|(key, _)| key.clone())
                .collect();
            keys.iter().filter_map(|key| retained.pop(key)).collect()
        };
        drop(released);
    }

    fn partition_emptied(&self, fs: FileSystemId) {
        report_empty(&self.registry, fs);
    }

    fn remove_key(&self, key: &CacheKey) {
        let visit = self.partitions.write(key.filesystem, false, |entries| {
            let removed = entries.remove(&key.name);
            if let Some(entry) = &removed {
                self.reverse.lock().remove(&entry.ref_id);
            }
            removed.is_some()
        });
        self.release(key);

        if let Some(visit) = visit {
            if visit.value {
                tracing::debug!("remove: {}", key.name.friendly_uri());
                if visit.emptied {
                    self.partition_emptied(key.filesystem);
                }
            }
        }
    }
}

impl<H: FileHandle> NoticeSink for Shared<H> {
    fn reclaimed(&self, ref_id: RefId) {
        let Some(key) = self.reverse.lock().get(&ref_id).cloned() else {
            // Already removed, replaced or cleared.
            return;
        };

        let visit = self.partitions.write(key.filesystem, false, |entries| {
            // Only remove the entry this reference was issued for. A newer put
            // for the same key carries a different id and must survive.
            match entries.get(&key.name) {
                Some(entry) if entry.ref_id == ref_id => {
                    entries.remove(&key.name);
                    self.reverse.lock().remove(&ref_id);
                    true
                }
                _ => false,
            }
        });

        if let Some(visit) = visit {
            if visit.value {
                self.stats.reclaimed();
                tracing::debug!("Reclaimed cache entry {}", key.name.friendly_uri());
                if visit.emptied {
                    self.partition_emptied(key.filesystem);
                }
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.partitions.is_empty()
    }
}

/// Cache over weak handle references with a background reaper.
pub struct ReclaimableCache<H: FileHandle> {
    flavor: Flavor,
    shared: Arc<Shared<H>>,
}

impl<H: FileHandle> ReclaimableCache<H> {
    pub fn new(
        flavor: Flavor,
        reaper_poll: Duration,
        registry: Option<Arc<dyn PartitionRegistry>>,
    ) -> Self {
        let retained = match flavor {
            Flavor::Soft { retain } => {
                NonZeroUsize::new(retain).map(|cap| Mutex::new(::lru::LruCache::new(cap)))
            }
            Flavor::Weak => None,
        };

        ReclaimableCache {
            flavor,
            shared: Arc::new(Shared {
                id: NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed),
                partitions: PartitionMap::new(),
                reverse: Mutex::new(FxHashMap::default()),
                retained,
                next_ref: AtomicU64::new(1),
                reaper: Reaper::new(reaper_poll),
                registry,
                stats: StatsRecorder::default(),
            }),
        }
    }

    pub fn weak(registry: Option<Arc<dyn PartitionRegistry>>) -> Self {
        Self::new(Flavor::Weak, DEFAULT_REAPER_POLL, registry)
    }

    pub fn soft(registry: Option<Arc<dyn PartitionRegistry>>) -> Self {
        Self::new(
            Flavor::Soft {
                retain: DEFAULT_SOFT_RETAIN,
            },
            DEFAULT_REAPER_POLL,
            registry,
        )
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    pub fn is_reaper_running(&self) -> bool {
        self.shared.reaper.is_running()
    }

    /// Number of outstanding reference ids, live or awaiting reclamation.
    #[doc(hidden)]
    pub fn reverse_len(&self) -> usize {
        self.shared.reverse.lock().len()
    }

    /// Linear scan of the reverse map, for diagnostics and tests.
    #[doc(hidden)]
    pub fn reverse_contains(&self, fs: FileSystemId, name: &FileName) -> bool {
        self.shared
            .reverse
            .lock()
            .values()
            .any(|key| key.filesystem == fs && &key.name == name)
    }

    pub fn partition_len(&self, fs: FileSystemId) -> usize {
        self.shared
            .partitions
            .read(fs, |entries| entries.len())
            .unwrap_or(0)
    }

    pub fn partition_count(&self) -> usize {
        self.shared.partitions.len()
    }

    fn insert(&self, handle: &Arc<H>, only_if_absent: bool) -> bool {
        let shared = &self.shared;
        let key = CacheKey::new(handle.filesystem(), handle.name().clone());
        tracing::debug!("put: {}", key.name.friendly_uri());

        let visit = shared.partitions.write(key.filesystem, true, |entries| {
            if only_if_absent {
                let live = entries
                    .get(&key.name)
                    .is_some_and(|entry| entry.handle.strong_count() > 0);
                if live {
                    return false;
                }
            }
            shared.install(entries, &key, handle);
            true
        });

        let inserted = visit.is_some_and(|visit| visit.value);
        if inserted {
            shared.stats.put();
            shared.retain(key, handle.clone());
            // A closed reaper ignores this, so a put racing shutdown cannot
            // bring the worker back.
            shared.reaper.ensure_running(Arc::downgrade(shared));
        }
        inserted
    }
}

impl<H: FileHandle> FilesCache<H> for ReclaimableCache<H> {
    fn put(&self, handle: &Arc<H>) {
        self.insert(handle, false);
    }

    fn put_if_absent(&self, handle: &Arc<H>) -> bool {
        self.insert(handle, true)
    }

    fn get(&self, filesystem: FileSystemId, name: &FileName) -> Option<Arc<H>> {
        let shared = &self.shared;
        let visit = shared.partitions.write(filesystem, false, |entries| {
            let Some(entry) = entries.get(name) else {
                return Lookup::Miss;
            };
            if let Some(handle) = entry.handle.upgrade() {
                return Lookup::Hit(handle);
            }
            if let Some(stale) = entries.remove(name) {
                shared.reverse.lock().remove(&stale.ref_id);
            }
            Lookup::Stale
        });

        let Some(visit) = visit else {
            shared.stats.lookup(false);
            return None;
        };
        match visit.value {
            Lookup::Hit(handle) => {
                shared.stats.lookup(true);
                shared.retain(CacheKey::new(filesystem, name.clone()), handle.clone());
                Some(handle)
            }
            Lookup::Stale => {
                shared.stats.lookup(false);
                shared.stats.reclaimed();
                tracing::debug!("Dropped stale cache entry {}", name.friendly_uri());
                if visit.emptied {
                    shared.partition_emptied(filesystem);
                }
                None
            }
            Lookup::Miss => {
                shared.stats.lookup(false);
                None
            }
        }
    }

    fn remove(&self, filesystem: FileSystemId, name: &FileName) {
        self.shared
            .remove_key(&CacheKey::new(filesystem, name.clone()));
    }

    fn touch(&self, handle: &Arc<H>) {
        if self.shared.retained.is_none() {
            return;
        }
        let cached = self
            .shared
            .partitions
            .read(handle.filesystem(), |entries| {
                entries
                    .get(handle.name())
                    .is_some_and(|entry| std::ptr::eq(entry.handle.as_ptr(), Arc::as_ptr(handle)))
            })
            .unwrap_or(false);
        if cached {
            let key = CacheKey::new(handle.filesystem(), handle.name().clone());
            self.shared.retain(key, handle.clone());
        }
    }

    fn clear(&self, filesystem: FileSystemId) {
        let shared = &self.shared;
        if let Some(entries) = shared.partitions.take(filesystem) {
            {
                let mut reverse = shared.reverse.lock();
                for entry in entries.values() {
                    reverse.remove(&entry.ref_id);
                }
            }
            tracing::debug!("Cleared {} cached handles for {}", entries.len(), filesystem);
        }
        shared.release_filesystem(filesystem);
    }

    fn shutdown(&self) {
        let shared = &self.shared;
        // Close the partitions first: writers still inside `insert` then either
        // finished before the drain below or see the closed flag.
        let drained = shared.partitions.close();
        shared.reaper.close();
        shared.reverse.lock().clear();
        if let Some(retained) = &shared.retained {
            let released: Vec<Arc<H>> = {
                let mut retained = retained.lock();
                std::iter::from_fn(|| retained.pop_lru().map(|(_, h)| h)).collect()
            };
            drop(released);
        }
        if !drained.is_empty() {
            tracing::debug!("Released {} reclaimable cache partitions", drained.len());
        }
    }

    fn stats(&self) -> CacheStats {
        self.shared.stats.snapshot()
    }
}

impl<H: FileHandle> Drop for ReclaimableCache<H> {
    fn drop(&mut self) {
        self.shared.reaper.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::handle::{HandleState, ReclaimHook};

    struct Probe {
        fs: FileSystemId,
        name: FileName,
        state: HandleState,
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
            Ok(())
        }
        fn reclaim_hook(&self) -> &ReclaimHook {
            self.state.hook()
        }
    }

    fn probe(fs: FileSystemId, path: &str) -> Arc<Probe> {
        Arc::new(Probe {
            fs,
            name: FileName::new("zip", path).unwrap(),
            state: HandleState::new(),
        })
    }

    #[test]
    fn test_overwrite_drops_old_reverse_entry() {
        let cache = ReclaimableCache::weak(None);
        let fs = FileSystemId::next();
        let first = probe(fs, "/entry.txt");
        let second = probe(fs, "/entry.txt");

        cache.put(&first);
        cache.put(&second);
        assert_eq!(cache.reverse_len(), 1);

        // The first handle's notice names a superseded reference
        drop(first);
        assert!(Arc::ptr_eq(&cache.get(fs, second.name()).unwrap(), &second));
        cache.shutdown();
    }

    #[test]
    fn test_stale_notice_is_ignored() {
        let cache = ReclaimableCache::weak(None);
        let fs = FileSystemId::next();
        let handle = probe(fs, "/a");
        cache.put(&handle);

        cache.shared.reclaimed(RefId(u64::MAX));
        assert_eq!(cache.partition_len(fs), 1);
        cache.shutdown();
    }

    #[test]
    fn test_hook_registration_is_per_cache() {
        let cache = ReclaimableCache::weak(None);
        let fs = FileSystemId::next();
        let handle = probe(fs, "/a");
        cache.put(&handle);
        cache.put(&handle);
        assert_eq!(handle.state.hook().registration_count(), 1);
        cache.shutdown();
    }

    #[test]
    fn test_soft_retention_bounded() {
        let cache = ReclaimableCache::new(Flavor::Soft { retain: 1 }, DEFAULT_REAPER_POLL, None);
        let fs = FileSystemId::next();
        let a = probe(fs, "/a");
        let b = probe(fs, "/b");
        let name_a = a.name().clone();
        cache.put(&a);
        cache.put(&b);
        drop(a);
        drop(b);

        // Only the most recent handle is still strongly held
        assert!(cache.get(fs, &name_a).is_none());
        assert_eq!(cache.partition_len(fs), 1);
        assert_eq!(cache.flavor(), Flavor::Soft { retain: 1 });
        cache.shutdown();
    }

    #[test]
    fn test_stale_get_clears_reverse_before_reaper_runs() {
        let cache = ReclaimableCache::weak(None);
        let fs = FileSystemId::next();
        let handle = probe(fs, "/stale");
        let name = handle.name().clone();
        cache.put(&handle);

        // Keep the notice queued so only the lookup can find the dead entry
        cache.shared.reaper.close();
        drop(handle);

        assert!(cache.get(fs, &name).is_none());
        assert_eq!(cache.reverse_len(), 0);
        assert_eq!(cache.partition_count(), 0);
        assert_eq!(cache.stats().reclaimed, 1);
    }

    #[test]
    fn test_shutdown_is_final_under_concurrent_puts() {
        use std::sync::atomic::AtomicBool;
        use std::thread;

        for _ in 0..50 {
            let cache = Arc::new(ReclaimableCache::new(
                Flavor::Soft { retain: 8 },
                Duration::from_millis(20),
                None,
            ));
            let done = Arc::new(AtomicBool::new(false));
            let fs = FileSystemId::next();

            let writers: Vec<_> = (0..4)
                .map(|t| {
                    let cache = cache.clone();
                    let done = done.clone();
                    thread::spawn(move || {
                        let mut i = 0;
                        while !done.load(Ordering::SeqCst) {
                            cache.put(&probe(fs, &format!("/t{}/f{}", t, i % 32)));
                            i += 1;
                        }
                    })
                })
                .collect();

            thread::sleep(Duration::from_micros(200));
            cache.shutdown();
            thread::sleep(Duration::from_millis(1));
            done.store(true, Ordering::SeqCst);
            for w in writers {
                w.join().unwrap();
            }

            assert!(!cache.is_reaper_running());
            assert_eq!(cache.partition_count(), 0);
            assert_eq!(cache.reverse_len(), 0);
            let retained = cache.shared.retained.as_ref().unwrap().lock().len();
            assert_eq!(retained, 0);
        }
    }
}
