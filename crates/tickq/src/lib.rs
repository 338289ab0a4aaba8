//! # tickq
//!
//! A process-wide managed-timer scheduler: an unbounded population of
//! logical timers multiplexed onto a single platform one-shot timer,
//! with callbacks dispatched on a worker pool.
//!
//! The design optimizes for churn over firing - timers here are
//! overwhelmingly timeouts that are created, rescheduled, and canceled
//! long before they expire, so the active set is an intrusive
//! doubly-linked list with O(1) insert/relink/remove under one lock,
//! and a sweep walks it only when the native timer actually wakes.
//!
//! ```no_run
//! use std::time::Duration;
//! use tickq::Timer;
//!
//! // One-shot, 50 ms from now.
//! let _once = Timer::new(|| println!("due!"), Some(Duration::from_millis(50)), None).unwrap();
//!
//! // Periodic heartbeat every second, stopped deterministically.
//! let mut beat = Timer::new(
//!     || println!("tick"),
//!     Some(Duration::from_secs(1)),
//!     Some(Duration::from_secs(1)),
//! )
//! .unwrap();
//! # std::thread::sleep(Duration::from_secs(3));
//! futures::executor::block_on(beat.dispose_async().unwrap());
//! // No callback of `beat` runs after this point.
//! ```
//!
//! # Disposal
//!
//! Three surfaces, one close each:
//!
//! - [`Timer::dispose`] - prompt; in-flight callbacks may still finish.
//! - [`Timer::dispose_with`] - sets a [`WaitEvent`] at quiescence.
//! - [`Timer::dispose_async`] - resolves a [`Quiescence`] future at
//!   quiescence.
//!
//! Dropping an undisposed handle behaves like [`Timer::dispose`].

mod clock;
mod config;
mod entry;
mod error;
mod event;
pub mod platform;
mod pool;
mod queue;

mod handle;
#[cfg(test)]
mod testing;

pub use clock::{MonotonicClock, TickSource};
pub use config::TimerConfig;
pub use entry::{Quiescence, MAX_DUE_MS};
pub use error::TimerError;
pub use event::WaitEvent;
pub use handle::{Flow, Timer};
pub use platform::OneShotTimer;
pub use pool::{Dispatch, Job, WorkerPool};
pub use queue::{global, QueueStats, TimerQueue};
