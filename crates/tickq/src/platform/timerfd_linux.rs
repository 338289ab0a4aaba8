//! timerfd-based one-shot timer (Linux)
//!
//! `timerfd_settime` atomically replaces the outstanding expiration,
//! which is exactly the single-slot arm contract. A waiter thread blocks
//! reading the fd and invokes the wake callback on each expiry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use nix::sys::time::TimeSpec;
use nix::sys::timerfd::{ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags};

use super::{OneShotTimer, WakeFn};

/// timerfd waiter thread (Linux).
pub struct TimerfdTimer {
    fd: Arc<TimerFd>,
    shutdown: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerfdTimer {
    /// Spawn the waiter thread. `wake` runs on that thread at expiry.
    pub fn spawn(name: &str, wake: WakeFn) -> Self {
        let fd = Arc::new(
            TimerFd::new(ClockId::CLOCK_MONOTONIC, TimerFlags::empty())
                .expect("timerfd_create failed"),
        );
        let shutdown = Arc::new(AtomicBool::new(false));

        let fd2 = fd.clone();
        let shutdown2 = shutdown.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || waiter_loop(fd2, shutdown2, wake))
            .expect("failed to spawn timer waiter thread");

        Self {
            fd,
            shutdown,
            handle: Mutex::new(Some(handle)),
        }
    }

    fn set(&self, spec: TimeSpec) {
        self.fd
            .set(Expiration::OneShot(spec), TimerSetTimeFlags::empty())
            .expect("timerfd_settime failed");
    }
}

impl OneShotTimer for TimerfdTimer {
    fn arm(&self, duration_ms: u32) {
        // An all-zero it_value disarms a timerfd, so a 0 ms request is
        // armed as 1 ns to keep "fire as soon as possible" semantics.
        let spec = if duration_ms == 0 {
            TimeSpec::new(0, 1)
        } else {
            let secs = i64::from(duration_ms / 1_000);
            let nanos = i64::from(duration_ms % 1_000) * 1_000_000;
            TimeSpec::new(secs, nanos)
        };
        self.set(spec);
    }
}

impl Drop for TimerfdTimer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        // Pop the waiter out of its blocking read.
        self.set(TimeSpec::new(0, 1));
        if let Some(handle) = self.handle.lock().unwrap().take() {
            // The last owner may be a wake callback running on the
            // waiter thread itself; joining would deadlock.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn waiter_loop(fd: Arc<TimerFd>, shutdown: Arc<AtomicBool>, wake: WakeFn) {
    loop {
        if fd.wait().is_err() {
            return;
        }
        if shutdown.load(Ordering::Acquire) {
            return;
        }
        wake();
    }
}
