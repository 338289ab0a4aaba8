//! One-shot manual-reset event
//!
//! The synchronizable signal object consumed by the wait-synchronous
//! disposal surface: the disposer hands one in, the queue sets it when
//! the last in-flight callback drains.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A manual-reset, set-once event.
///
/// Waiters block until some thread calls [`set`](WaitEvent::set); once
/// set it stays set.
#[derive(Debug, Default)]
pub struct WaitEvent {
    state: Mutex<bool>,
    condvar: Condvar,
}

impl WaitEvent {
    /// Create an unset event.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Set the event, releasing all current and future waiters.
    pub fn set(&self) {
        let mut state = self.state.lock().unwrap();
        *state = true;
        self.condvar.notify_all();
    }

    /// Block until the event is set.
    pub fn wait(&self) {
        let mut state = self.state.lock().unwrap();
        while !*state {
            state = self.condvar.wait(state).unwrap();
        }
    }

    /// Block until the event is set or `timeout` elapses.
    ///
    /// Returns `true` if the event was set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock().unwrap();
        let deadline = std::time::Instant::now() + timeout;
        while !*state {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.condvar.wait_timeout(state, deadline - now).unwrap();
            state = guard;
        }
        true
    }

    /// Non-blocking check.
    pub fn is_set(&self) -> bool {
        *self.state.lock().unwrap()
    }
}
