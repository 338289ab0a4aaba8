//! Public timer handle
//!
//! A thin validated facade over the queue: unit conversion, range
//! checks, and the three disposal surfaces. The handle owns its entry -
//! dropping it closes the entry exactly once, and an explicit dispose
//! suppresses the drop-path close.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::entry::{Callback, EntryKey, Quiescence, INFINITE, MAX_DUE_MS};
use crate::error::TimerError;
use crate::event::WaitEvent;
use crate::queue::{global, TimerQueue};

/// Whether a timer captures the ambient tracing span at creation.
///
/// A captured span is re-entered around every callback invocation, so
/// events logged by the callback land in the creating context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Capture the current span (the default surfaces do this).
    Capture,
    /// Invoke the callback raw.
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseKind {
    None,
    Prompt,
    Signal,
    Async,
}

/// A logical timer: one-shot or periodic.
///
/// The callback runs on the queue's worker pool (or in-line on the
/// sweep thread for the first expiry of a batch). Periodic callbacks
/// are not serialized per timer: if an invocation outlasts the period,
/// the pool may overlap it with the next one.
pub struct Timer {
    queue: Arc<TimerQueue>,
    key: EntryKey,
    closed: CloseKind,
}

impl Timer {
    /// Create a timer on the process-wide queue.
    ///
    /// `due` of `None` leaves the timer disabled until a later
    /// [`change`](Timer::change); `period` of `None` makes it one-shot.
    /// A zero `due` fires as soon as the queue can dispatch. Durations
    /// above [`MAX_DUE_MS`] milliseconds fail with `OutOfRange`.
    pub fn new(
        callback: impl Fn() + Send + Sync + 'static,
        due: Option<Duration>,
        period: Option<Duration>,
    ) -> Result<Self, TimerError> {
        let due = ms_from_duration(due)?;
        let period = ms_from_duration(period)?;
        Self::create(global(), Arc::new(callback), due, period, Flow::Capture)
    }

    /// Create a timer on a specific queue, with an explicit context-flow
    /// choice. Used by embedders and tests that inject a queue.
    pub fn new_in(
        queue: &Arc<TimerQueue>,
        callback: impl Fn() + Send + Sync + 'static,
        due: Option<Duration>,
        period: Option<Duration>,
        flow: Flow,
    ) -> Result<Self, TimerError> {
        let due = ms_from_duration(due)?;
        let period = ms_from_duration(period)?;
        Self::create(queue, Arc::new(callback), due, period, flow)
    }

    /// Signed-millisecond surface: `-1` means disabled / one-shot,
    /// anything else below `-1` or above [`MAX_DUE_MS`] fails.
    pub fn with_millis(
        callback: impl Fn() + Send + Sync + 'static,
        due_ms: i64,
        period_ms: i64,
    ) -> Result<Self, TimerError> {
        let due = ms_from_signed(due_ms)?;
        let period = ms_from_signed(period_ms)?;
        Self::create(global(), Arc::new(callback), due, period, Flow::Capture)
    }

    /// Unsigned-millisecond surface: accepts the full range, with
    /// `u32::MAX` meaning disabled / one-shot.
    pub fn with_millis_u32(
        callback: impl Fn() + Send + Sync + 'static,
        due_ms: u32,
        period_ms: u32,
    ) -> Result<Self, TimerError> {
        Self::create(global(), Arc::new(callback), due_ms, period_ms, Flow::Capture)
    }

    fn create(
        queue: &Arc<TimerQueue>,
        callback: Callback,
        due: u32,
        period: u32,
        flow: Flow,
    ) -> Result<Self, TimerError> {
        let span = match flow {
            Flow::Capture => Some(tracing::Span::current()),
            Flow::Raw => None,
        };
        let key = queue.register(callback, span);
        let timer = Self {
            queue: queue.clone(),
            key,
            closed: CloseKind::None,
        };
        if due != INFINITE {
            timer.queue.change(key, due, period)?;
        }
        Ok(timer)
    }

    /// Reschedule: restart the interval from now with a new due time and
    /// period. `None` due disables the timer; `None` period makes it
    /// one-shot. Fails with `Disposed` after any close.
    pub fn change(
        &self,
        due: Option<Duration>,
        period: Option<Duration>,
    ) -> Result<(), TimerError> {
        self.queue
            .change(self.key, ms_from_duration(due)?, ms_from_duration(period)?)
    }

    /// [`change`](Timer::change) with signed milliseconds (`-1` =
    /// disabled / one-shot).
    pub fn change_millis(&self, due_ms: i64, period_ms: i64) -> Result<(), TimerError> {
        self.queue
            .change(self.key, ms_from_signed(due_ms)?, ms_from_signed(period_ms)?)
    }

    /// [`change`](Timer::change) with unsigned milliseconds
    /// (`u32::MAX` = disabled / one-shot).
    pub fn change_millis_u32(&self, due_ms: u32, period_ms: u32) -> Result<(), TimerError> {
        self.queue.change(self.key, due_ms, period_ms)
    }

    /// Prompt dispose: cancel and return immediately. Callbacks already
    /// in flight may still be running. Idempotent.
    pub fn dispose(&mut self) {
        if self.closed == CloseKind::None {
            self.closed = CloseKind::Prompt;
            self.queue.close(self.key);
        }
    }

    /// Dispose and have `signal` set once no callback of this timer is
    /// executing (immediately, if none is).
    ///
    /// Fails with `AlreadyClosed` if the timer was already disposed
    /// through any surface.
    pub fn dispose_with(&mut self, signal: &Arc<WaitEvent>) -> Result<(), TimerError> {
        if self.closed != CloseKind::None {
            return Err(TimerError::AlreadyClosed);
        }
        self.closed = CloseKind::Signal;
        self.queue.close_signaled(self.key, signal)
    }

    /// Dispose and return a future resolving once no callback of this
    /// timer is executing.
    ///
    /// May follow a prompt dispose (the future then tracks the drain)
    /// or repeat a previous `dispose_async` (the same completion is
    /// observed). Fails with `AlreadyClosed` after a
    /// [`dispose_with`](Timer::dispose_with): the external signal may
    /// already have been consumed by its waiter, so it is never bridged
    /// into a future.
    pub fn dispose_async(&mut self) -> Result<Quiescence, TimerError> {
        if self.closed == CloseKind::Signal {
            return Err(TimerError::AlreadyClosed);
        }
        if self.closed == CloseKind::None {
            self.closed = CloseKind::Async;
        }
        self.queue.close_async(self.key)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if self.closed == CloseKind::None {
            self.queue.close(self.key);
        }
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("key", &self.key)
            .field("closed", &(self.closed != CloseKind::None))
            .finish()
    }
}

fn ms_from_duration(value: Option<Duration>) -> Result<u32, TimerError> {
    match value {
        None => Ok(INFINITE),
        Some(duration) => {
            let ms = duration.as_millis();
            if ms > u128::from(MAX_DUE_MS) {
                return Err(TimerError::OutOfRange { millis: ms as i128 });
            }
            Ok(ms as u32)
        }
    }
}

fn ms_from_signed(ms: i64) -> Result<u32, TimerError> {
    if ms == -1 {
        return Ok(INFINITE);
    }
    if ms < -1 || ms > i64::from(MAX_DUE_MS) {
        return Err(TimerError::OutOfRange {
            millis: i128::from(ms),
        });
    }
    Ok(ms as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{advance_and_sweep, rig};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;

    fn wait_until(pred: impl Fn() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !pred() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    #[test]
    fn test_signed_below_minus_one_rejected() {
        let err = Timer::with_millis(|| {}, -2, 0).unwrap_err();
        assert_eq!(err, TimerError::OutOfRange { millis: -2 });

        let err = Timer::with_millis(|| {}, 10, -7).unwrap_err();
        assert_eq!(err, TimerError::OutOfRange { millis: -7 });
    }

    #[test]
    fn test_signed_above_max_rejected() {
        let too_big = i64::from(MAX_DUE_MS) + 1;
        let err = Timer::with_millis(|| {}, too_big, 0).unwrap_err();
        assert_eq!(
            err,
            TimerError::OutOfRange {
                millis: i128::from(too_big)
            }
        );
    }

    #[test]
    fn test_duration_above_max_rejected() {
        let too_big = Duration::from_millis(u64::from(MAX_DUE_MS) + 1);
        let err = Timer::new(|| {}, Some(too_big), None).unwrap_err();
        assert!(matches!(err, TimerError::OutOfRange { .. }));
    }

    #[test]
    fn test_conversion_sentinels() {
        assert_eq!(ms_from_signed(-1).unwrap(), INFINITE);
        assert_eq!(ms_from_signed(0).unwrap(), 0);
        assert_eq!(ms_from_signed(i64::from(MAX_DUE_MS)).unwrap(), MAX_DUE_MS);
        assert_eq!(ms_from_duration(None).unwrap(), INFINITE);
        assert_eq!(
            ms_from_duration(Some(Duration::from_millis(250))).unwrap(),
            250
        );
    }

    // ------------------------------------------------------------------
    // Handle lifecycle against an injected queue
    // ------------------------------------------------------------------

    #[test]
    fn test_drop_closes_entry() {
        let r = rig();
        {
            let _timer = Timer::new_in(
                &r.queue,
                || {},
                Some(Duration::from_millis(50)),
                None,
                Flow::Raw,
            )
            .unwrap();
            assert_eq!(r.queue.active_timers(), 1);
        }
        assert_eq!(r.queue.active_timers(), 0);
        assert_eq!(r.queue.stats().registered, 0);
    }

    #[test]
    fn test_disabled_then_changed() {
        let r = rig();
        let count = Arc::new(AtomicU32::new(0));
        let count2 = count.clone();
        let timer = Timer::new_in(
            &r.queue,
            move || {
                count2.fetch_add(1, Ordering::SeqCst);
            },
            None,
            None,
            Flow::Raw,
        )
        .unwrap();
        assert_eq!(r.queue.active_timers(), 0);

        advance_and_sweep(&r, 1_000);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        timer.change(Some(Duration::from_millis(10)), None).unwrap();
        advance_and_sweep(&r, 10);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_period_zero_is_one_shot() {
        let r = rig();
        let count = Arc::new(AtomicU32::new(0));
        let count2 = count.clone();
        let timer = Timer::new_in(
            &r.queue,
            move || {
                count2.fetch_add(1, Ordering::SeqCst);
            },
            Some(Duration::from_millis(5)),
            Some(Duration::ZERO),
            Flow::Raw,
        )
        .unwrap();

        advance_and_sweep(&r, 5);
        advance_and_sweep(&r, 100);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        drop(timer);
    }

    #[test]
    fn test_change_after_dispose_fails() {
        let r = rig();
        let mut timer = Timer::new_in(
            &r.queue,
            || {},
            Some(Duration::from_millis(50)),
            None,
            Flow::Raw,
        )
        .unwrap();
        timer.dispose();
        assert_eq!(
            timer.change(Some(Duration::from_millis(10)), None),
            Err(TimerError::Disposed)
        );
        // Idempotent.
        timer.dispose();
    }

    #[test]
    fn test_close_at_most_once_across_surfaces() {
        let r = rig();
        let mut timer = Timer::new_in(
            &r.queue,
            || {},
            Some(Duration::from_millis(50)),
            None,
            Flow::Raw,
        )
        .unwrap();

        let signal = Arc::new(WaitEvent::new());
        timer.dispose_with(&signal).unwrap();
        assert!(signal.is_set());

        // Signal close claimed the slot: both tracking surfaces refuse.
        assert_eq!(
            timer.dispose_with(&signal).unwrap_err(),
            TimerError::AlreadyClosed
        );
        assert_eq!(timer.dispose_async().unwrap_err(), TimerError::AlreadyClosed);
    }

    #[test]
    fn test_dispose_async_after_prompt_dispose_is_ready() {
        let r = rig();
        let mut timer = Timer::new_in(
            &r.queue,
            || {},
            Some(Duration::from_millis(50)),
            None,
            Flow::Raw,
        )
        .unwrap();
        timer.dispose();
        let quiescence = timer.dispose_async().unwrap();
        assert!(quiescence.is_complete());
    }

    #[test]
    fn test_repeated_dispose_async_shares_completion() {
        let r = rig();
        let mut timer = Timer::new_in(
            &r.queue,
            || {},
            Some(Duration::from_millis(50)),
            None,
            Flow::Raw,
        )
        .unwrap();
        let first = timer.dispose_async().unwrap();
        let second = timer.dispose_async().unwrap();
        assert!(first.is_complete() && second.is_complete());
    }

    // ------------------------------------------------------------------
    // End-to-end on the process-wide queue (real clock, waiter, pool)
    // ------------------------------------------------------------------

    #[test]
    fn test_one_shot_fires_once_e2e() {
        let count = Arc::new(AtomicU32::new(0));
        let count2 = count.clone();
        let _timer = Timer::new(
            move || {
                count2.fetch_add(1, Ordering::SeqCst);
            },
            Some(Duration::from_millis(200)),
            None,
        )
        .unwrap();

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        assert!(wait_until(
            || count.load(Ordering::SeqCst) == 1,
            Duration::from_secs(5)
        ));
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_periodic_fires_repeatedly_e2e() {
        let count = Arc::new(AtomicU32::new(0));
        let count2 = count.clone();
        let mut timer = Timer::new(
            move || {
                count2.fetch_add(1, Ordering::SeqCst);
            },
            Some(Duration::from_millis(10)),
            Some(Duration::from_millis(10)),
        )
        .unwrap();

        assert!(wait_until(
            || count.load(Ordering::SeqCst) >= 5,
            Duration::from_secs(5)
        ));
        timer.dispose();
    }

    #[test]
    fn test_dispose_async_stops_periodic_e2e() {
        let count = Arc::new(AtomicU32::new(0));
        let count2 = count.clone();
        let mut timer = Timer::new(
            move || {
                count2.fetch_add(1, Ordering::SeqCst);
            },
            Some(Duration::from_millis(5)),
            Some(Duration::from_millis(5)),
        )
        .unwrap();

        let quiescence = timer.dispose_async().unwrap();
        futures::executor::block_on(quiescence);

        // Post-completion, no further invocation ever occurs.
        let settled = count.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(count.load(Ordering::SeqCst), settled);
    }

    #[test]
    fn test_dispose_with_waits_for_in_flight_e2e() {
        let count = Arc::new(AtomicU32::new(0));
        let count2 = count.clone();
        let mut timer = Timer::new(
            move || {
                count2.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(15));
            },
            Some(Duration::from_millis(1)),
            Some(Duration::from_millis(1)),
        )
        .unwrap();

        assert!(wait_until(
            || count.load(Ordering::SeqCst) >= 1,
            Duration::from_secs(5)
        ));

        let signal = Arc::new(WaitEvent::new());
        timer.dispose_with(&signal).unwrap();
        assert!(signal.wait_timeout(Duration::from_secs(5)));

        // Quiescent: the count never moves again.
        let settled = count.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(count.load(Ordering::SeqCst), settled);
    }

    #[test]
    fn test_callback_may_reenter_timer_api_e2e() {
        let inner_fired = Arc::new(AtomicU32::new(0));
        let inner_slot: Arc<Mutex<Option<Timer>>> = Arc::new(Mutex::new(None));

        let inner_fired2 = inner_fired.clone();
        let inner_slot2 = inner_slot.clone();
        let _outer = Timer::new(
            move || {
                // Creating a timer from inside a callback takes the
                // queue lock after the sweep released it.
                let inner_fired3 = inner_fired2.clone();
                let inner = Timer::new(
                    move || {
                        inner_fired3.fetch_add(1, Ordering::SeqCst);
                    },
                    Some(Duration::from_millis(1)),
                    None,
                )
                .unwrap();
                *inner_slot2.lock().unwrap() = Some(inner);
            },
            Some(Duration::from_millis(5)),
            None,
        )
        .unwrap();

        assert!(wait_until(
            || inner_fired.load(Ordering::SeqCst) >= 1,
            Duration::from_secs(5)
        ));
    }
}
