//! The deterministic fork-join worker pool (§3 "Worker"/"Barriers", §4.D,
//! §5, §9 "Ad-hoc worker pool → a typed pool abstraction").
//!
//! Two `N+1`-party barriers replace the source's manually-managed threads,
//! barriers and condition variables with two operations: `release()` lets
//! all workers begin in lockstep, `join()` waits for them to finish. Workers
//! never lock, allocate or log; the only cross-thread data they touch is a
//! small input/output slot pair synchronized purely by barrier
//! happens-before, mirroring the source's raw shared arrays guarded by
//! `pthread_barrier_t`.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::{Arc, Barrier};
use std::thread::JoinHandle;

use crate::error::{EngineError, EngineResult};

/// Splits `[0, total_notes)` into `num_workers` contiguous, non-overlapping
/// ranges that exactly partition the space (§8 Testable Property 1). Any
/// remainder is distributed one note at a time to the first ranges so sizes
/// differ by at most one.
pub fn partition_notes(total_notes: usize, num_workers: usize) -> Vec<(usize, usize)> {
    assert!(num_workers > 0);
    let base = total_notes / num_workers;
    let remainder = total_notes % num_workers;

    let mut ranges = Vec::with_capacity(num_workers);
    let mut start = 0;
    for i in 0..num_workers {
        let len = base + usize::from(i < remainder);
        let end = start + len;
        ranges.push((start, end));
        start = end;
    }
    ranges
}

/// A value shared across the worker/orchestrator boundary, synchronized
/// purely by the two barriers: the writer's store happens-before any
/// `barrier.wait()` call that the reader's subsequent `barrier.wait()`
/// rendezvous with.
///
/// # Safety
/// Callers must only write before the barrier wait that hands the data to
/// the reader, and only read after the barrier wait that receives it from
/// the writer. The pool upholds this by construction; this type has no
/// public unsynchronized access.
pub struct BarrierSlot<T>(UnsafeCell<T>);

unsafe impl<T: Send> Sync for BarrierSlot<T> {}

impl<T> BarrierSlot<T> {
    pub fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    /// # Safety
    /// See the type-level safety contract.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut(&self) -> &mut T {
        &mut *self.0.get()
    }

    /// # Safety
    /// See the type-level safety contract.
    pub unsafe fn get(&self) -> &T {
        &*self.0.get()
    }
}

/// A persistent, barrier-synchronized fork-join pool.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    start_barrier: Arc<Barrier>,
    end_barrier: Arc<Barrier>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawns `num_workers` persistent threads, each running `worker_fn(i)`
    /// in a loop: wait at the start barrier, check shutdown, run the body,
    /// wait at the end barrier. `worker_fn` is expected to close over the
    /// worker's exclusively-owned state and its `BarrierSlot` input/output
    /// handles.
    pub fn build<F>(num_workers: usize, worker_fn: F) -> EngineResult<Self>
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        let start_barrier = Arc::new(Barrier::new(num_workers + 1));
        let end_barrier = Arc::new(Barrier::new(num_workers + 1));
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_fn = Arc::new(worker_fn);

        let mut handles = Vec::with_capacity(num_workers);

        for index in 0..num_workers {
            let start_barrier = Arc::clone(&start_barrier);
            let end_barrier = Arc::clone(&end_barrier);
            let shutdown = Arc::clone(&shutdown);
            let worker_fn = Arc::clone(&worker_fn);

            let spawned = std::thread::Builder::new()
                .name(format!("sp3ctra-worker-{index}"))
                .spawn(move || {
                    if let Err(e) = thread_priority::set_current_thread_priority(
                        thread_priority::ThreadPriority::Max,
                    ) {
                        log::warn!("worker {index}: failed to acquire RT priority: {e:?}");
                    }

                    loop {
                        start_barrier.wait();

                        if shutdown.load(Relaxed) {
                            break;
                        }

                        worker_fn(index);

                        end_barrier.wait();
                    }
                })
                .map_err(|source| EngineError::WorkerSpawn { index, source })?;

            handles.push(spawned);
        }

        Ok(Self { handles, start_barrier, end_barrier, shutdown })
    }

    /// Releases all workers to begin processing the current buffer, then
    /// blocks until they have all reached the start barrier's rendezvous
    /// (i.e. they have all observed the release and begun running).
    pub fn release(&self) {
        self.start_barrier.wait();
    }

    /// Blocks until all workers have finished this buffer's work.
    pub fn join(&self) {
        self.end_barrier.wait();
    }

    /// Signals shutdown and performs the final barrier pass so every worker
    /// observes the flag and exits cleanly (§5 "Cancellation / shutdown").
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Relaxed);
        self.start_barrier.wait();

        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
