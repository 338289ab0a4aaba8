//! Deterministic test doubles for the queue's collaborators
//!
//! A settable clock, a native timer that only records arm requests, and
//! a dispatcher that collects jobs for explicit draining. Sweeps are
//! driven by hand, so tick arithmetic, arming, and drift behavior can be
//! asserted exactly.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::clock::TickSource;
use crate::platform::OneShotTimer;
use crate::pool::{Dispatch, Job};
use crate::queue::TimerQueue;

/// Settable tick source.
pub(crate) struct MockClock {
    now: AtomicU32,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            now: AtomicU32::new(0),
        }
    }

    pub fn now(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }

    pub fn set(&self, ticks: u32) {
        self.now.store(ticks, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u32) {
        // Wrapping on purpose: tests cross the u32 boundary.
        let now = self.now.load(Ordering::SeqCst);
        self.now.store(now.wrapping_add(ms), Ordering::SeqCst);
    }
}

impl TickSource for MockClock {
    fn now_ticks(&self) -> u32 {
        self.now()
    }
}

/// Records every arm request; never wakes anything on its own.
pub(crate) struct ManualTimer {
    log: Mutex<Vec<u32>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self {
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn armed_log(&self) -> Vec<u32> {
        self.log.lock().unwrap().clone()
    }
}

impl OneShotTimer for ManualTimer {
    fn arm(&self, duration_ms: u32) {
        self.log.lock().unwrap().push(duration_ms);
    }
}

/// Collects jobs; `run_all` drains them outside any queue lock.
pub(crate) struct CollectDispatch {
    jobs: Mutex<Vec<Job>>,
}

impl CollectDispatch {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
        }
    }

    pub fn pending(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn run_all(&self) {
        loop {
            let batch: Vec<Job> = std::mem::take(&mut *self.jobs.lock().unwrap());
            if batch.is_empty() {
                return;
            }
            for job in batch {
                job();
            }
        }
    }
}

impl Dispatch for CollectDispatch {
    fn enqueue(&self, job: Job) {
        self.jobs.lock().unwrap().push(job);
    }
}

pub(crate) struct TestRig {
    pub queue: Arc<TimerQueue>,
    pub clock: Arc<MockClock>,
    pub native: Arc<ManualTimer>,
    pub dispatch: Arc<CollectDispatch>,
}

impl TestRig {
    /// One sweep plus a full drain of pool-dispatched fires.
    pub fn sweep(&self) {
        self.queue.fire_next_timers();
        self.dispatch.run_all();
    }
}

pub(crate) fn rig() -> TestRig {
    let clock = Arc::new(MockClock::new());
    let native = Arc::new(ManualTimer::new());
    let dispatch = Arc::new(CollectDispatch::new());
    let queue = TimerQueue::with_parts(clock.clone(), native.clone(), dispatch.clone());
    TestRig {
        queue,
        clock,
        native,
        dispatch,
    }
}

pub(crate) fn advance_and_sweep(r: &TestRig, ms: u32) {
    r.clock.advance(ms);
    r.sweep();
}
