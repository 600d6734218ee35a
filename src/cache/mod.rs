//! Handle caches: at most one live handle per (filesystem, name) pair.
//!
//! Every policy implements [`FilesCache`]. Which one a manager uses is chosen
//! by [`CachePolicy`] through [`build_cache`]:
//!
//! - [`NullCache`] stores nothing, every lookup misses.
//! - [`UnboundedCache`] never evicts.
//! - [`LruCache`] bounds each filesystem's partition and evicts the least
//!   recently used handle that is neither bound nor content-open.
//! - [`ReclaimableCache`] keeps only weak references and drops entries once
//!   their handle is gone, either eagerly ([`Flavor::Weak`]) or after the
//!   handle also leaves a bounded retention window ([`Flavor::Soft`]).

pub mod lru;
pub mod null;
pub(crate) mod partition;
pub(crate) mod reaper;
pub mod reclaim;
pub mod unbounded;

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{CacheConfig, CachePolicy};
use crate::error::Result;
use crate::handle::FileHandle;
use crate::name::{FileName, FileSystemId};

pub use self::lru::LruCache;
pub use self::null::NullCache;
pub use self::reclaim::{Flavor, ReclaimableCache};
pub use self::unbounded::UnboundedCache;

/// Operations shared by every cache policy.
pub trait FilesCache<H: FileHandle>: Send + Sync {
    /// Associate the handle's key with the handle, replacing any prior entry.
    fn put(&self, handle: &Arc<H>);

    /// Insert only if no live entry exists for the key. Returns whether the
    /// handle was inserted.
    fn put_if_absent(&self, handle: &Arc<H>) -> bool;

    fn get(&self, filesystem: FileSystemId, name: &FileName) -> Option<Arc<H>>;

    /// Delete the entry if present.
    fn remove(&self, filesystem: FileSystemId, name: &FileName);

    /// Hint that the handle was just used.
    fn touch(&self, handle: &Arc<H>);

    /// Drop every entry belonging to one filesystem.
    fn clear(&self, filesystem: FileSystemId);

    /// Release every partition and stop background work. Safe to repeat.
    fn shutdown(&self);

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }

    /// False for caches that never keep what they are given.
    fn stores_entries(&self) -> bool {
        true
    }
}

/// Told when a filesystem's partition has become empty so that the owner may
/// close the filesystem's connection.
///
/// Called from whichever thread emptied the partition, including the reaper.
/// No cache lock is held during the call.
pub trait PartitionRegistry: Send + Sync {
    fn on_partition_empty(&self, filesystem: FileSystemId);
}

pub(crate) fn report_empty(registry: &Option<Arc<dyn PartitionRegistry>>, fs: FileSystemId) {
    tracing::debug!("Reporting empty cache partition for {}", fs);
    if let Some(registry) = registry {
        registry.on_partition_empty(fs);
    }
}

/// Point-in-time counters for one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub evictions: u64,
    pub vetoes: u64,
    pub reclaimed: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    evictions: AtomicU64,
    vetoes: AtomicU64,
    reclaimed: AtomicU64,
}

impl StatsRecorder {
    pub fn lookup(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn evicted(&self, n: u64) {
        self.evictions.fetch_add(n, Ordering::Relaxed);
    }

    pub fn vetoed(&self, n: u64) {
        self.vetoes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn reclaimed(&self) {
        self.reclaimed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            vetoes: self.vetoes.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
        }
    }
}

/// Build the cache selected by `config`.
pub fn build_cache<H: FileHandle>(
    config: &CacheConfig,
    registry: Option<Arc<dyn PartitionRegistry>>,
) -> Result<Arc<dyn FilesCache<H>>> {
    crate::config::validate_cache_config(config)?;

    let cache: Arc<dyn FilesCache<H>> = match config.get_policy() {
        CachePolicy::Disabled => Arc::new(NullCache::new()),
        CachePolicy::Unbounded => Arc::new(UnboundedCache::new(registry)),
        CachePolicy::Lru => Arc::new(LruCache::with_capacity(
            config.get_lru_capacity(),
            registry,
        )?),
        CachePolicy::Weak => Arc::new(ReclaimableCache::new(
            Flavor::Weak,
            Duration::from_millis(config.get_reaper_poll_ms()),
            registry,
        )),
        CachePolicy::Soft => Arc::new(ReclaimableCache::new(
            Flavor::Soft {
                retain: config.get_soft_retain(),
            },
            Duration::from_millis(config.get_reaper_poll_ms()),
            registry,
        )),
    };
    tracing::debug!("Built {} handle cache", config.get_policy());
    Ok(cache)
}
