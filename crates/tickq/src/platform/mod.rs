//! Platform one-shot timer adapter
//!
//! A single-slot native timer: `arm(duration_ms)` arranges for the wake
//! callback to run no later than `duration_ms` from now, and arming again
//! replaces any outstanding request. The queue tolerates early wakes, so
//! adapters are free to under-promise.
//!
//! Platform-specific implementations use the most efficient primitive
//! available; the portable fallback is a condvar waiter thread.

use std::time::Duration;

/// Wake callback invoked on the waiter thread when the timer expires.
pub type WakeFn = Box<dyn Fn() + Send + Sync>;

/// Single-slot one-shot timer.
///
/// Implementations may clamp `duration_ms` to a platform maximum; a
/// clamped (early) wake is indistinguishable from a spurious one and the
/// queue's sweep simply re-arms.
pub trait OneShotTimer: Send + Sync {
    /// Request a wake no later than `duration_ms` from now, replacing
    /// any outstanding request. `0` fires as soon as possible.
    fn arm(&self, duration_ms: u32);
}

#[inline]
pub(crate) fn ms_duration(duration_ms: u32) -> Duration {
    Duration::from_millis(u64::from(duration_ms))
}

// Portable waiter; also the reference implementation for tests.
mod fallback;
pub use fallback::CondvarTimer;

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod timerfd_linux;
        pub use timerfd_linux::TimerfdTimer as PlatformTimer;
    } else {
        pub use fallback::CondvarTimer as PlatformTimer;
    }
}

/// Spawn the platform-appropriate timer waiter thread.
pub fn spawn_platform_timer(name: &str, wake: WakeFn) -> PlatformTimer {
    PlatformTimer::spawn(name, wake)
}
