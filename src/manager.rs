use std::sync::Arc;

use crate::cache::{build_cache, FilesCache, PartitionRegistry};
use crate::config::{CacheConfig, CacheStrategy};
use crate::error::{CacheError, Result};
use crate::handle::FileHandle;
use crate::name::{FileName, FileSystemId};

/// Bound on insert/lookup rounds in [`HandleManager::resolve`]. Only a cache
/// that has been shut down keeps refusing.
const MAX_INSERT_ATTEMPTS: usize = 8;

/// Resolves handles through a cache so that each (filesystem, name) pair has
/// at most one live handle while it is cached.
pub struct HandleManager<H: FileHandle> {
    cache: Arc<dyn FilesCache<H>>,
    strategy: CacheStrategy,
}

impl<H: FileHandle> HandleManager<H> {
    pub fn new(cache: Arc<dyn FilesCache<H>>, strategy: CacheStrategy) -> Self {
        HandleManager { cache, strategy }
    }

    pub fn from_config(
        config: &CacheConfig,
        registry: Option<Arc<dyn PartitionRegistry>>,
    ) -> Result<Self> {
        let cache = build_cache(config, registry)?;
        Ok(Self::new(cache, config.get_strategy()))
    }

    pub fn cache(&self) -> &Arc<dyn FilesCache<H>> {
        &self.cache
    }

    pub fn strategy(&self) -> CacheStrategy {
        self.strategy
    }

    /// Return the cached handle for `name`, or build one with `make`.
    ///
    /// When two threads miss at once, both build a handle but only the first
    /// insert wins; the loser's handle is dropped and the winner returned.
    pub fn resolve<F>(&self, fs: FileSystemId, name: &FileName, make: F) -> Result<Arc<H>>
    where
        F: FnOnce() -> Result<H>,
    {
        if let Some(handle) = self.cache.get(fs, name) {
            if self.strategy != CacheStrategy::Manual {
                handle.refresh()?;
            }
            self.cache.touch(&handle);
            return Ok(handle);
        }

        let handle = Arc::new(make()?);
        if handle.filesystem() != fs || handle.name() != name {
            return Err(CacheError::InvalidName(format!(
                "factory for {} on {} produced {} on {}",
                name.friendly_uri(),
                fs,
                handle.name().friendly_uri(),
                handle.filesystem()
            )));
        }

        if !self.cache.stores_entries() {
            return Ok(handle);
        }
        for _ in 0..MAX_INSERT_ATTEMPTS {
            if self.cache.put_if_absent(&handle) {
                return Ok(handle);
            }
            // Another resolver won. Its handle may be reclaimed before we read
            // it back, in which case the slot is free again.
            if let Some(winner) = self.cache.get(fs, name) {
                return Ok(winner);
            }
        }
        tracing::debug!(
            "Could not cache {} on {}, returning an uncached handle",
            name.friendly_uri(),
            fs
        );
        Ok(handle)
    }

    /// Run `f` against a handle, refreshing it first under
    /// [`CacheStrategy::OnCall`].
    pub fn access<R>(&self, handle: &Arc<H>, f: impl FnOnce(&H) -> Result<R>) -> Result<R> {
        if self.strategy == CacheStrategy::OnCall {
            handle.refresh()?;
        }
        self.cache.touch(handle);
        f(handle)
    }

    /// Forget every handle of a filesystem that is being closed.
    pub fn close_filesystem(&self, fs: FileSystemId) {
        tracing::debug!("Closing filesystem {}", fs);
        self.cache.clear(fs);
    }

    pub fn shutdown(&self) {
        self.cache.shutdown();
    }
}
