//! Condvar-based one-shot timer
//!
//! Used on platforms without a native one-shot timer fd.
//! A single waiter thread sleeps on a condvar until the armed deadline;
//! re-arming overwrites the deadline and pokes the condvar.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use super::{ms_duration, OneShotTimer, WakeFn};

#[derive(Default)]
struct TimerState {
    deadline: Option<Instant>,
    shutdown: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    condvar: Condvar,
}

/// Condvar waiter thread (portable).
pub struct CondvarTimer {
    shared: Arc<TimerShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CondvarTimer {
    /// Spawn the waiter thread. `wake` runs on that thread at expiry.
    pub fn spawn(name: &str, wake: WakeFn) -> Self {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState::default()),
            condvar: Condvar::new(),
        });

        let shared2 = shared.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || waiter_loop(shared2, wake))
            .expect("failed to spawn timer waiter thread");

        Self {
            shared,
            handle: Mutex::new(Some(handle)),
        }
    }
}

impl OneShotTimer for CondvarTimer {
    fn arm(&self, duration_ms: u32) {
        let mut state = self.shared.state.lock().unwrap();
        state.deadline = Some(Instant::now() + ms_duration(duration_ms));
        drop(state);
        self.shared.condvar.notify_one();
    }
}

impl Drop for CondvarTimer {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
        }
        self.shared.condvar.notify_one();
        if let Some(handle) = self.handle.lock().unwrap().take() {
            // The last owner may be a wake callback running on the
            // waiter thread itself; joining would deadlock.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn waiter_loop(shared: Arc<TimerShared>, wake: WakeFn) {
    let mut state = shared.state.lock().unwrap();
    loop {
        if state.shutdown {
            return;
        }
        match state.deadline {
            None => {
                state = shared.condvar.wait(state).unwrap();
            }
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    state.deadline = None;
                    // The state lock is never held across the wake:
                    // the sweep takes the queue lock and may re-arm.
                    drop(state);
                    wake();
                    state = shared.state.lock().unwrap();
                } else {
                    let (guard, _) = shared
                        .condvar
                        .wait_timeout(state, deadline - now)
                        .unwrap();
                    state = guard;
                }
            }
        }
    }
}
