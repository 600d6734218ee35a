use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use vfscache::{
    CacheError, FileHandle, FileName, FileSystemId, HandleState, PartitionRegistry, ReclaimHook,
    Result,
};

/// Handle double that records what the cache does to it.
pub struct TestHandle {
    pub fs: FileSystemId,
    pub name: FileName,
    pub state: HandleState,
    pub detached: AtomicUsize,
    pub refreshed: AtomicUsize,
    pub fail_detach: AtomicBool,
}

#[allow(dead_code)]
impl TestHandle {
    pub fn new(fs: FileSystemId, path: &str) -> Arc<Self> {
        Arc::new(Self::unshared(fs, path))
    }

    pub fn unshared(fs: FileSystemId, path: &str) -> Self {
        TestHandle {
            fs,
            name: name(path),
            state: HandleState::new(),
            detached: AtomicUsize::new(0),
            refreshed: AtomicUsize::new(0),
            fail_detach: AtomicBool::new(false),
        }
    }

    pub fn detach_count(&self) -> usize {
        self.detached.load(Ordering::SeqCst)
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshed.load(Ordering::SeqCst)
    }
}

impl FileHandle for TestHandle {
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
        self.state.set_bound(false);
        if self.fail_detach.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("detach failed".to_string()));
        }
        Ok(())
    }

    fn refresh(&self) -> Result<()> {
        self.refreshed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reclaim_hook(&self) -> &ReclaimHook {
        self.state.hook()
    }
}

/// Registry double collecting every emptied-partition report.
#[derive(Default)]
pub struct RecordingRegistry {
    pub emptied: Mutex<Vec<FileSystemId>>,
}

#[allow(dead_code)]
impl RecordingRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reported(&self, fs: FileSystemId) -> bool {
        self.emptied.lock().contains(&fs)
    }

    pub fn count(&self) -> usize {
        self.emptied.lock().len()
    }
}

impl PartitionRegistry for RecordingRegistry {
    fn on_partition_empty(&self, filesystem: FileSystemId) {
        self.emptied.lock().push(filesystem);
    }
}

pub fn name(path: &str) -> FileName {
    FileName::new("test", path).expect("valid test path")
}

/// Poll `cond` until it holds or `timeout` passes.
#[allow(dead_code)]
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
