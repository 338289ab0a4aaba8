//! Worker pool
//!
//! Fire-and-forget executor for timer callbacks that cannot run in-line
//! on the sweep thread. A lock-free injector feeds a fixed set of worker
//! threads; idle workers park on a condvar with a timeout so a lost wake
//! never strands a job.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_queue::SegQueue;

use crate::config::TimerConfig;

/// A unit of fire-and-forget work.
pub type Job = Box<dyn FnOnce() + Send>;

/// Sink for fire-and-forget work items.
///
/// The queue depends only on this trait; tests substitute an in-line
/// dispatcher to make sweeps deterministic.
pub trait Dispatch: Send + Sync {
    /// Accept a job for eventual execution. Must not block on the job.
    fn enqueue(&self, job: Job);
}

struct PoolShared {
    injector: SegQueue<Job>,
    shutdown: AtomicBool,
    parked: AtomicUsize,
    mutex: Mutex<bool>, // wake_pending
    condvar: Condvar,
}

impl PoolShared {
    fn wake_one(&self) {
        if self.parked.load(Ordering::Acquire) == 0 {
            return;
        }
        {
            let mut pending = self.mutex.lock().unwrap();
            *pending = true;
        }
        self.condvar.notify_one();
    }

    fn wake_all(&self) {
        {
            let mut pending = self.mutex.lock().unwrap();
            *pending = true;
        }
        self.condvar.notify_all();
    }

    fn park(&self, timeout: Duration) {
        self.parked.fetch_add(1, Ordering::SeqCst);
        let mut pending = self.mutex.lock().unwrap();
        if !*pending {
            let (guard, _) = self.condvar.wait_timeout(pending, timeout).unwrap();
            pending = guard;
        }
        *pending = false;
        self.parked.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Pool of worker threads draining a shared injector queue.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    num_workers: usize,
}

impl WorkerPool {
    /// Spawn `config.num_workers` named worker threads.
    pub fn start(config: &TimerConfig) -> Self {
        let shared = Arc::new(PoolShared {
            injector: SegQueue::new(),
            shutdown: AtomicBool::new(false),
            parked: AtomicUsize::new(0),
            mutex: Mutex::new(false),
            condvar: Condvar::new(),
        });

        let mut handles = Vec::with_capacity(config.num_workers);
        for i in 0..config.num_workers {
            let shared = shared.clone();
            let park_timeout = config.park_timeout;

            let mut builder =
                thread::Builder::new().name(format!("{}-{}", config.worker_name_prefix, i));
            if let Some(stack_size) = config.worker_stack_size {
                builder = builder.stack_size(stack_size);
            }

            let handle = builder
                .spawn(move || worker_loop(shared, park_timeout))
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }

        tracing::debug!(workers = config.num_workers, "worker pool started");

        Self {
            shared,
            handles: Mutex::new(handles),
            num_workers: config.num_workers,
        }
    }

    /// Number of worker threads.
    #[inline]
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Signal shutdown and wait for all workers to finish.
    ///
    /// Jobs still in the injector are drained before the workers exit.
    pub fn stop(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wake_all();
        let current = thread::current().id();
        let mut handles = self.handles.lock().unwrap();
        for handle in handles.drain(..) {
            // A job may own the pool's last reference; never join the
            // worker that is running it.
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }
}

impl Dispatch for WorkerPool {
    fn enqueue(&self, job: Job) {
        self.shared.injector.push(job);
        self.shared.wake_one();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: Arc<PoolShared>, park_timeout: Duration) {
    loop {
        while let Some(job) = shared.injector.pop() {
            job();
        }
        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }
        shared.park(park_timeout);
    }
}
