use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use vfscache::{
    load_config, CacheError, CachePolicy, CacheStats, FileHandle, FileName, FileSystemId,
    HandleManager, HandleState, PartitionRegistry, ReclaimHook, Result,
};

/// Handle with no backend behind it; "binding" just flips the flag.
struct MemoryHandle {
    fs: FileSystemId,
    name: FileName,
    state: HandleState,
}

impl MemoryHandle {
    fn bind(fs: FileSystemId, name: FileName) -> Self {
        let state = HandleState::new();
        state.set_bound(true);
        MemoryHandle { fs, name, state }
    }
}

impl FileHandle for MemoryHandle {
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
        self.state.set_bound(false);
        Ok(())
    }

    fn reclaim_hook(&self) -> &ReclaimHook {
        self.state.hook()
    }
}

#[derive(Default)]
struct CountingRegistry {
    emptied: AtomicU64,
}

impl PartitionRegistry for CountingRegistry {
    fn on_partition_empty(&self, filesystem: FileSystemId) {
        tracing::debug!("Filesystem {} has no cached handles left", filesystem);
        self.emptied.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone)]
pub struct SimulateOptions {
    pub policy: Option<CachePolicy>,
    pub capacity: Option<usize>,
    pub filesystems: usize,
    pub paths: usize,
    pub threads: usize,
    pub rounds: usize,
    pub pin_every: usize,
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    policy: String,
    resolves: u64,
    elapsed_ms: u128,
    emptied_partitions: u64,
    stats: CacheStats,
}

pub fn run_simulation(options: SimulateOptions) -> Result<()> {
    if options.filesystems == 0 || options.paths == 0 || options.threads == 0 {
        return Err(CacheError::Config(
            "filesystems, paths and threads must all be positive".to_string(),
        ));
    }

    let mut config = load_config()?.cache;
    if let Some(policy) = options.policy {
        config.policy = policy;
    }
    if options.capacity.is_some() {
        config.lru_capacity = options.capacity;
    }

    let registry = Arc::new(CountingRegistry::default());
    let manager: HandleManager<MemoryHandle> =
        HandleManager::from_config(&config, Some(registry.clone()))?;

    let filesystems: Vec<FileSystemId> =
        (0..options.filesystems).map(|_| FileSystemId::next()).collect();
    let names: Vec<FileName> = (0..options.paths)
        .map(|i| FileName::new("mem", &format!("/dir{}/file{}.dat", i % 16, i)))
        .collect::<Result<_>>()?;

    let started = Instant::now();
    let resolves = AtomicU64::new(0);
    std::thread::scope(|scope| -> Result<()> {
        let workers: Vec<_> = (0..options.threads)
            .map(|t| {
                let manager = &manager;
                let filesystems = &filesystems;
                let names = &names;
                let resolves = &resolves;
                let options = &options;
                scope.spawn(move || -> Result<()> {
                    // Seeded per thread so runs are repeatable.
                    let mut rng = StdRng::seed_from_u64(t as u64 + 1);
                    let mut pinned = Vec::new();
                    for round in 0..options.rounds {
                        let fs = filesystems[rng.random_range(0..filesystems.len())];
                        let name = &names[rng.random_range(0..names.len())];
                        let handle = manager
                            .resolve(fs, name, || Ok(MemoryHandle::bind(fs, name.clone())))?;
                        // Only unbound handles are eligible for eviction.
                        handle.state.set_bound(false);
                        if options.pin_every > 0 && round % options.pin_every == 0 {
                            handle.state.open_stream();
                            pinned.push(handle);
                        }
                        resolves.fetch_add(1, Ordering::Relaxed);
                    }
                    for handle in pinned {
                        handle.state.close_stream();
                    }
                    Ok(())
                })
            })
            .collect();

        for worker in workers {
            worker
                .join()
                .map_err(|_| CacheError::Backend("simulation thread panicked".to_string()))??;
        }
        Ok(())
    })?;
    let elapsed = started.elapsed();

    if matches!(config.policy, CachePolicy::Soft | CachePolicy::Weak) {
        // Give the reaper one poll interval to drain outstanding notices.
        std::thread::sleep(Duration::from_millis(config.get_reaper_poll_ms().min(2000)));
    }

    let report = SimulationReport {
        policy: config.policy.to_string(),
        resolves: resolves.load(Ordering::Relaxed),
        elapsed_ms: elapsed.as_millis(),
        emptied_partitions: registry.emptied.load(Ordering::Relaxed),
        stats: manager.cache().stats(),
    };
    manager.shutdown();

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Policy:             {}", report.policy);
        println!("Resolves:           {}", report.resolves);
        println!("Elapsed:            {}ms", report.elapsed_ms);
        println!("Hits:               {}", report.stats.hits);
        println!("Misses:             {}", report.stats.misses);
        println!("Puts:               {}", report.stats.puts);
        println!("Evictions:          {}", report.stats.evictions);
        println!("Eviction vetoes:    {}", report.stats.vetoes);
        println!("Reclaimed:          {}", report.stats.reclaimed);
        println!("Emptied partitions: {}", report.emptied_partitions);
    }
    Ok(())
}
