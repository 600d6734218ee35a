//! Background worker that turns handle-drop notices into cache removals.

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

/// Identifies one reclaimable reference handed out by a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RefId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Notice {
    /// The handle behind this reference has been dropped.
    Reclaimed(RefId),
    /// Nudge the worker so it notices a stop request before its poll timeout.
    Wake,
}

/// Receiver side of the notices, implemented by the cache internals.
pub(crate) trait NoticeSink: Send + Sync + 'static {
    fn reclaimed(&self, ref_id: RefId);

    /// True when the cache holds no entries. A worker that sees this after a
    /// quiet poll interval retires.
    fn is_idle(&self) -> bool;
}

struct Worker {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl Worker {
    fn is_live(&self) -> bool {
        !self.stop.load(Ordering::Acquire) && !self.thread.is_finished()
    }
}

type WorkerSlot = Arc<Mutex<Option<Worker>>>;

/// Owns the notice channel and at most one live worker thread.
///
/// The worker is started on demand and retires by itself once the cache has
/// stayed empty for a full poll interval, so a cache that keeps emptying and
/// refilling reuses one thread. Notices sent while no worker runs stay queued
/// for the next one. After [`Reaper::close`] no worker is ever started again.
pub(crate) struct Reaper {
    tx: Sender<Notice>,
    rx: Arc<Mutex<Receiver<Notice>>>,
    poll: Duration,
    worker: WorkerSlot,
    closed: AtomicBool,
}

impl Reaper {
    pub fn new(poll: Duration) -> Self {
        let (tx, rx) = mpsc::channel();
        Reaper {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            poll,
            worker: Arc::new(Mutex::new(None)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn sender(&self) -> Sender<Notice> {
        self.tx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().as_ref().is_some_and(Worker::is_live)
    }

    /// Start a worker unless a live one already exists or the reaper is closed.
    pub fn ensure_running<S: NoticeSink>(&self, sink: Weak<S>) {
        let mut slot = self.worker.lock();
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if slot.as_ref().is_some_and(Worker::is_live) {
            return;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let context = WorkerContext {
            rx: self.rx.clone(),
            slot: self.worker.clone(),
            stop: stop.clone(),
            poll: self.poll,
        };
        let spawned = thread::Builder::new()
            .name("vfscache-reaper".to_string())
            .spawn(move || run(context, sink));

        match spawned {
            Ok(thread) => {
                tracing::info!("Started cache reaper thread");
                *slot = Some(Worker { stop, thread });
            }
            Err(e) => {
                // Lookups still drop stale entries synchronously.
                tracing::error!("Failed to spawn cache reaper thread: {}", e);
            }
        }
    }

    /// Ask the worker to stop. With `join`, also wait for it to exit unless
    /// called from the worker thread itself.
    pub fn stop(&self, join: bool) {
        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            return;
        };

        worker.stop.store(true, Ordering::Release);
        let _ = self.tx.send(Notice::Wake);
        tracing::info!("Stopping cache reaper thread");

        if join && worker.thread.thread().id() != current_thread() {
            if worker.thread.join().is_err() {
                tracing::warn!("Cache reaper thread panicked while stopping");
            }
        }
    }

    /// Stop the worker for good. Later `ensure_running` calls do nothing.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.stop(true);
    }
}

fn current_thread() -> ThreadId {
    thread::current().id()
}

struct WorkerContext {
    rx: Arc<Mutex<Receiver<Notice>>>,
    slot: WorkerSlot,
    stop: Arc<AtomicBool>,
    poll: Duration,
}

impl WorkerContext {
    /// Retire this worker if the sink is idle. Decided under the worker slot
    /// lock so that a concurrent `ensure_running` either sees the worker as
    /// live before the check or starts a replacement after it.
    fn retire_if_idle<S: NoticeSink>(&self, sink: &S) -> bool {
        let mut slot = self.slot.lock();
        if self.stop.load(Ordering::Acquire) {
            return true;
        }
        if !sink.is_idle() {
            return false;
        }

        self.stop.store(true, Ordering::Release);
        if slot
            .as_ref()
            .is_some_and(|worker| Arc::ptr_eq(&worker.stop, &self.stop))
        {
            slot.take();
        }
        tracing::info!("Cache is empty, stopping reaper thread");
        true
    }
}

fn run<S: NoticeSink>(context: WorkerContext, sink: Weak<S>) {
    tracing::debug!("Cache reaper loop started, poll={:?}", context.poll);
    while !context.stop.load(Ordering::Acquire) {
        let notice = context.rx.lock().recv_timeout(context.poll);
        match notice {
            Ok(Notice::Reclaimed(ref_id)) => {
                let Some(sink) = sink.upgrade() else {
                    break;
                };
                let outcome = catch_unwind(AssertUnwindSafe(|| sink.reclaimed(ref_id)));
                if outcome.is_err() {
                    tracing::error!("Panic while reclaiming cache reference {:?}", ref_id);
                }
            }
            Ok(Notice::Wake) => {}
            Err(RecvTimeoutError::Timeout) => {
                let Some(sink) = sink.upgrade() else {
                    break;
                };
                if context.retire_if_idle(&*sink) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::debug!("Cache reaper loop exited");
}
