//! Bounded worker pool for holotree operations
//!
//! Walkers deep inside a tree traversal schedule opaque units of work and
//! never thread errors back up; a unit that fails records its error in a
//! shared first-failure cell and later units check-and-skip. [`WorkerPool::sync`]
//! is the only barrier: it blocks until every submitted unit has completed
//! or been skipped and surfaces the first failure exactly once.
//!
//! Units may submit further units (removals scheduled from inside a
//! reconciliation unit, for instance); the pending counter is incremented at
//! submission time, so `sync()` always waits for transitively scheduled
//! work. Units must never call `sync()` themselves.
//!
//! The pool is a cheap handle: cloning shares the same threads, the same
//! backlog and the same failure cell.

use crate::error::{HoloError, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Bounded pool executing fallible units of work
#[derive(Clone)]
pub struct WorkerPool {
    threads: Arc<rayon::ThreadPool>,
    state: Arc<PoolState>,
}

struct PoolState {
    pending: Mutex<usize>,
    done: Condvar,
    failed: AtomicBool,
    first_error: Mutex<Option<HoloError>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.threads.current_num_threads())
            .field("pending", &*self.state.pending.lock())
            .field("failed", &self.state.failed.load(Ordering::Relaxed))
            .finish()
    }
}

impl WorkerPool {
    /// Create a pool with the given number of workers (0 means one per
    /// logical CPU).
    pub fn new(workers: usize) -> Result<Self> {
        let threads = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|at| format!("holotree-{at}"))
            .build()
            .map_err(|err| HoloError::Pool(err.to_string()))?;
        debug!("worker pool up with {} threads", threads.current_num_threads());
        Ok(WorkerPool {
            threads: Arc::new(threads),
            state: Arc::new(PoolState {
                pending: Mutex::new(0),
                done: Condvar::new(),
                failed: AtomicBool::new(false),
                first_error: Mutex::new(None),
            }),
        })
    }

    /// Enqueue one unit. Safe to call from inside a running unit.
    pub fn submit<F>(&self, unit: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        *self.state.pending.lock() += 1;
        let state = Arc::clone(&self.state);
        self.threads.spawn(move || {
            if !state.failed.load(Ordering::Acquire) {
                if let Err(err) = unit() {
                    state.failed.store(true, Ordering::Release);
                    let mut slot = state.first_error.lock();
                    if slot.is_none() {
                        *slot = Some(err);
                    }
                }
            }
            let mut pending = state.pending.lock();
            *pending -= 1;
            if *pending == 0 {
                state.done.notify_all();
            }
        });
    }

    /// Block until every submitted unit has finished, surfacing the first
    /// failure. A successful sync resets the failure state so the pool can
    /// be reused for the next phase.
    pub fn sync(&self) -> Result<()> {
        let mut pending = self.state.pending.lock();
        while *pending > 0 {
            self.state.done.wait(&mut pending);
        }
        drop(pending);
        let first = self.state.first_error.lock().take();
        self.state.failed.store(false, Ordering::Release);
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

static PART_IDS: AtomicU64 = AtomicU64::new(1);

/// Next id from the process-wide monotonic identity source. Partial file
/// names embed it so concurrent writers of the same sink never collide.
pub fn next_part_id() -> u64 {
    PART_IDS.fetch_add(1, Ordering::Relaxed)
}
