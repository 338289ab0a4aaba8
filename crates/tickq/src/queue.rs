//! Timer queue core
//!
//! One process-wide queue multiplexes every logical timer onto a single
//! platform one-shot timer. Entries live in an intrusive doubly-linked
//! list (keys into a slot map) guarded by one mutex: creation, mutation
//! and deletion are O(1), and a sweep walks the whole list when the
//! native timer wakes. The cost model is deliberate - timers here are
//! overwhelmingly timeouts that are created and canceled long before
//! they fire, so churn is the hot path and firing is the cold one.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use slotmap::SlotMap;

use crate::clock::{MonotonicClock, TickSource};
use crate::config::TimerConfig;
use crate::entry::{Callback, EntryKey, Notify, Quiescence, TimerEntry, INFINITE};
use crate::error::TimerError;
use crate::event::WaitEvent;
use crate::platform::{spawn_platform_timer, OneShotTimer};
use crate::pool::{Dispatch, WorkerPool};

/// Longest duration ever requested from the native timer (~74 hours).
///
/// Longer requests are armed at this bound and simply re-armed by the
/// sweep that the early wake triggers, once it finds nothing due.
pub(crate) const MAX_NATIVE_MS: u32 = 0x0FFF_FFFF;

struct QueueInner {
    entries: SlotMap<EntryKey, TimerEntry>,
    head: Option<EntryKey>,
    /// Currently outstanding native duration; `INFINITE` when the last
    /// wake has been consumed and nothing is armed.
    armed_duration: u32,
    /// Tick at which `armed_duration` was requested.
    armed_start_tick: u32,
    // Lifetime counters
    total_created: u64,
    total_fired: u64,
    total_canceled: u64,
}

impl QueueInner {
    fn new() -> Self {
        Self {
            entries: SlotMap::with_key(),
            head: None,
            armed_duration: INFINITE,
            armed_start_tick: 0,
            total_created: 0,
            total_fired: 0,
            total_canceled: 0,
        }
    }

    /// Splice a detached entry at the head of the list.
    fn link_head(&mut self, key: EntryKey) {
        debug_assert!(!self.entries[key].is_linked());
        let old_head = self.head;
        if let Some(h) = old_head {
            self.entries[h].prev = Some(key);
        }
        let entry = &mut self.entries[key];
        entry.prev = None;
        entry.next = old_head;
        self.head = Some(key);
    }

    /// Unlink and reset schedule fields. No-op when already detached.
    fn unlink(&mut self, key: EntryKey) {
        let (linked, prev, next) = {
            let entry = &self.entries[key];
            (entry.is_linked(), entry.prev, entry.next)
        };
        if !linked {
            return;
        }
        match prev {
            Some(p) => self.entries[p].next = next,
            None => self.head = next,
        }
        if let Some(n) = next {
            self.entries[n].prev = prev;
        }
        let entry = &mut self.entries[key];
        entry.prev = None;
        entry.next = None;
        entry.due_offset = INFINITE;
        entry.period = INFINITE;
        entry.start_tick = 0;
    }

    /// Insert-or-relink with fresh schedule fields, then make sure the
    /// native timer wakes early enough.
    fn update(
        &mut self,
        key: EntryKey,
        due: u32,
        period: u32,
        clock: &dyn TickSource,
        native: &dyn OneShotTimer,
    ) {
        debug_assert_ne!(due, INFINITE);
        if !self.entries[key].is_linked() {
            self.link_head(key);
        }
        let entry = &mut self.entries[key];
        entry.due_offset = due;
        entry.period = if period == 0 { INFINITE } else { period };
        entry.start_tick = clock.now_ticks();
        self.ensure_armed_by(due, clock, native);
    }

    /// Arming is monotonic in "earliest next wake": keep the outstanding
    /// request when it is imminent or already at least as early as
    /// `requested`, otherwise replace it.
    fn ensure_armed_by(&mut self, requested: u32, clock: &dyn TickSource, native: &dyn OneShotTimer) {
        debug_assert_ne!(requested, INFINITE);
        let actual = requested.min(MAX_NATIVE_MS);
        if self.armed_duration != INFINITE {
            let elapsed = clock.now_ticks().wrapping_sub(self.armed_start_tick);
            if elapsed >= self.armed_duration {
                // The wake is imminent; the sweep will re-arm.
                return;
            }
            if actual >= self.armed_duration - elapsed {
                return;
            }
        }
        tracing::trace!(duration_ms = actual, "arming native timer");
        native.arm(actual);
        self.armed_duration = actual;
        self.armed_start_tick = clock.now_ticks();
    }
}

/// The managed-timer queue.
///
/// Normally reached through [`global()`]; embedders and tests can build
/// their own with [`TimerQueue::with_config`] or inject every
/// collaborator with [`TimerQueue::with_parts`].
pub struct TimerQueue {
    inner: Mutex<QueueInner>,
    clock: Arc<dyn TickSource>,
    native: Arc<dyn OneShotTimer>,
    dispatch: Arc<dyn Dispatch>,
    /// Back-reference handed to pool jobs, so a queued fire neither
    /// keeps the queue alive nor touches a dead one.
    self_weak: Weak<TimerQueue>,
}

/// Snapshot of queue counters.
#[derive(Debug, Clone)]
pub struct QueueStats {
    /// Entries currently scheduled (linked).
    pub active: usize,
    /// Entries currently registered (scheduled or not).
    pub registered: usize,
    /// Outstanding native arming, if any.
    pub armed_duration_ms: Option<u32>,
    /// Timers created over the queue's lifetime.
    pub total_created: u64,
    /// Callback invocations over the queue's lifetime.
    pub total_fired: u64,
    /// Timers closed over the queue's lifetime.
    pub total_canceled: u64,
}

/// The process-wide timer queue, built on first use from
/// [`TimerConfig::from_env`]. Lives for the process.
pub fn global() -> &'static Arc<TimerQueue> {
    static QUEUE: OnceLock<Arc<TimerQueue>> = OnceLock::new();
    QUEUE.get_or_init(|| TimerQueue::with_config(&TimerConfig::from_env()))
}

impl TimerQueue {
    /// Build a queue with the production clock, the platform one-shot
    /// timer, and a worker pool per `config`.
    pub fn with_config(config: &TimerConfig) -> Arc<Self> {
        let clock = Arc::new(MonotonicClock::new());
        let pool = Arc::new(WorkerPool::start(config));
        Arc::new_cyclic(|weak: &Weak<TimerQueue>| {
            let wake = weak.clone();
            let native = spawn_platform_timer(
                &config.timer_thread_name,
                Box::new(move || {
                    if let Some(queue) = wake.upgrade() {
                        queue.fire_next_timers();
                    }
                }),
            );
            Self::from_parts(clock, Arc::new(native), pool, weak.clone())
        })
    }

    /// Build a queue from injected collaborators.
    ///
    /// The caller is responsible for wiring the native timer's wake to
    /// [`TimerQueue::fire_next_timers`].
    pub fn with_parts(
        clock: Arc<dyn TickSource>,
        native: Arc<dyn OneShotTimer>,
        dispatch: Arc<dyn Dispatch>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self::from_parts(clock, native, dispatch, weak.clone()))
    }

    fn from_parts(
        clock: Arc<dyn TickSource>,
        native: Arc<dyn OneShotTimer>,
        dispatch: Arc<dyn Dispatch>,
        self_weak: Weak<TimerQueue>,
    ) -> Self {
        Self {
            inner: Mutex::new(QueueInner::new()),
            clock,
            native,
            dispatch,
            self_weak,
        }
    }

    /// Number of entries currently scheduled.
    pub fn active_timers(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.entries.values().filter(|e| e.is_linked()).count()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().unwrap();
        QueueStats {
            active: inner.entries.values().filter(|e| e.is_linked()).count(),
            registered: inner.entries.len(),
            armed_duration_ms: (inner.armed_duration != INFINITE).then_some(inner.armed_duration),
            total_created: inner.total_created,
            total_fired: inner.total_fired,
            total_canceled: inner.total_canceled,
        }
    }

    /// Register a detached entry. The entry fires only after a
    /// subsequent `change`.
    pub(crate) fn register(&self, callback: Callback, span: Option<tracing::Span>) -> EntryKey {
        let mut inner = self.inner.lock().unwrap();
        inner.total_created += 1;
        inner.entries.insert(TimerEntry::new(callback, span))
    }

    /// Reschedule (or, with `due == INFINITE`, park) an entry.
    pub(crate) fn change(&self, key: EntryKey, due: u32, period: u32) -> Result<(), TimerError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.entries.get(key) {
            None => return Err(TimerError::Disposed),
            Some(entry) if entry.canceled => return Err(TimerError::Disposed),
            Some(_) => {}
        }
        if due == INFINITE {
            inner.unlink(key);
        } else {
            inner.update(key, due, period, &*self.clock, &*self.native);
        }
        Ok(())
    }

    /// Prompt close: cancel and detach. Idempotent. In-flight callbacks
    /// keep running; the entry's slot is reclaimed when the last one
    /// drains.
    pub(crate) fn close(&self, key: EntryKey) {
        let mut inner = self.inner.lock().unwrap();
        match inner.entries.get(key) {
            None => return,
            Some(entry) if entry.canceled => return,
            Some(_) => {}
        }
        inner.unlink(key);
        inner.total_canceled += 1;
        let entry = &mut inner.entries[key];
        entry.canceled = true;
        if entry.in_flight == 0 {
            inner.entries.remove(key);
        }
    }

    /// Close and signal `signal` once no callback is executing.
    pub(crate) fn close_signaled(
        &self,
        key: EntryKey,
        signal: &Arc<WaitEvent>,
    ) -> Result<(), TimerError> {
        let quiescent = {
            let mut inner = self.inner.lock().unwrap();
            match inner.entries.get(key) {
                None => return Err(TimerError::AlreadyClosed),
                Some(entry) if entry.canceled => return Err(TimerError::AlreadyClosed),
                Some(_) => {}
            }
            inner.unlink(key);
            inner.total_canceled += 1;
            let entry = &mut inner.entries[key];
            entry.canceled = true;
            if entry.in_flight == 0 {
                inner.entries.remove(key);
                true
            } else {
                entry.notify = Notify::Event(signal.clone());
                false
            }
        };
        // Signaling happens outside the lock: a waiter may wake and
        // immediately call back into the queue.
        if quiescent {
            signal.set();
        }
        Ok(())
    }

    /// Close and return a future that resolves once no callback is
    /// executing.
    ///
    /// Fails with `AlreadyClosed` only when a signal-based close already
    /// claimed the notification slot; an external event may be auto-
    /// consumed by its waiter, so it is never bridged into a future.
    pub(crate) fn close_async(&self, key: EntryKey) -> Result<Quiescence, TimerError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.get(key).is_none() {
            return Ok(Quiescence::ready());
        }
        if !inner.entries[key].canceled {
            inner.unlink(key);
            inner.total_canceled += 1;
            let entry = &mut inner.entries[key];
            entry.canceled = true;
            if entry.in_flight == 0 {
                inner.entries.remove(key);
                return Ok(Quiescence::ready());
            }
            return Ok(Quiescence::pending(install_future(entry)));
        }
        if matches!(inner.entries[key].notify, Notify::Event(_)) {
            return Err(TimerError::AlreadyClosed);
        }
        if let Notify::Future { shared, .. } = &inner.entries[key].notify {
            return Ok(Quiescence::pending(shared.clone()));
        }
        // Previously prompt-closed; callbacks still draining.
        debug_assert!(inner.entries[key].in_flight > 0);
        Ok(Quiescence::pending(install_future(&mut inner.entries[key])))
    }

    /// One pass over the active list, invoked when the native timer
    /// wakes. The first expired entry fires on the calling thread; the
    /// rest go to the worker pool.
    pub fn fire_next_timers(&self) {
        let mut first_to_fire: Option<EntryKey> = None;
        {
            let mut inner = self.inner.lock().unwrap();
            // The wake has been consumed.
            inner.armed_duration = INFINITE;

            let now = self.clock.now_ticks();
            let mut next_duration = INFINITE;
            let mut cursor = inner.head;

            while let Some(key) = cursor {
                // Capture the successor before any unlink.
                let (next, due, period, start) = {
                    let entry = &inner.entries[key];
                    (entry.next, entry.due_offset, entry.period, entry.start_tick)
                };
                cursor = next;

                let elapsed = now.wrapping_sub(start);
                if elapsed >= due {
                    if period != INFINITE {
                        // Subtract the overrun so a periodic timer tracks
                        // its original cadence; a lagging timer gets a
                        // 1 ms floor so it reschedules promptly without
                        // monopolizing the lock.
                        let entry = &mut inner.entries[key];
                        entry.start_tick = now;
                        let overrun = elapsed - due;
                        entry.due_offset = if overrun < period {
                            period - overrun
                        } else {
                            1
                        };
                        next_duration = next_duration.min(entry.due_offset);
                    } else {
                        inner.unlink(key);
                    }
                    if first_to_fire.is_none() {
                        first_to_fire = Some(key);
                    } else {
                        let weak = self.self_weak.clone();
                        self.dispatch.enqueue(Box::new(move || {
                            if let Some(queue) = weak.upgrade() {
                                queue.fire(key);
                            }
                        }));
                    }
                } else {
                    next_duration = next_duration.min(due - elapsed);
                }
            }

            if next_duration != INFINITE {
                inner.ensure_armed_by(next_duration, &*self.clock, &*self.native);
            }
            tracing::trace!(next_duration, "sweep complete");
        }
        // In-line dispatch of the first expired entry saves it the
        // pool round-trip.
        if let Some(key) = first_to_fire {
            self.fire(key);
        }
    }

    /// Run one callback invocation for `key`.
    ///
    /// Skips silently when the entry was closed (or fully reclaimed)
    /// between scheduling and execution. The callback runs outside the
    /// lock - it may legally re-enter the timer API.
    pub(crate) fn fire(&self, key: EntryKey) {
        let (callback, span) = {
            let mut inner = self.inner.lock().unwrap();
            let Some(entry) = inner.entries.get_mut(key) else {
                return;
            };
            if entry.canceled {
                return;
            }
            entry.in_flight += 1;
            inner.total_fired += 1;
            let entry = &inner.entries[key];
            (entry.callback.clone(), entry.span.clone())
        };

        // A panicking callback counts as a normal return for the
        // quiescence barrier.
        let result = panic::catch_unwind(AssertUnwindSafe(|| match &span {
            Some(span) => span.in_scope(|| (callback)()),
            None => (callback)(),
        }));
        if result.is_err() {
            tracing::warn!("timer callback panicked");
        }

        let notify = {
            let mut inner = self.inner.lock().unwrap();
            let entry = inner
                .entries
                .get_mut(key)
                .expect("in-flight entry reclaimed early");
            entry.in_flight -= 1;
            if entry.canceled && entry.in_flight == 0 {
                let entry = inner.entries.remove(key).expect("entry vanished");
                debug_assert!(entry.prev.is_none() && entry.next.is_none());
                Some(entry.notify)
            } else {
                None
            }
        };
        match notify {
            Some(Notify::Event(event)) => event.set(),
            Some(Notify::Future { tx, .. }) => {
                let _ = tx.send(());
            }
            Some(Notify::None) | None => {}
        }
    }

    /// Panic unless every structural invariant holds. Test-only.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        use std::collections::HashSet;

        let inner = self.inner.lock().unwrap();
        let mut reachable = HashSet::new();
        let mut prev = None;
        let mut cursor = inner.head;
        while let Some(key) = cursor {
            assert!(reachable.insert(key), "cycle in timer list");
            let entry = &inner.entries[key];
            assert_eq!(entry.prev, prev, "prev pointer mismatch");
            assert!(entry.is_linked(), "linked entry marked detached");
            assert!(!entry.canceled, "canceled entry still linked");
            prev = Some(key);
            cursor = entry.next;
        }
        for (key, entry) in inner.entries.iter() {
            if entry.is_linked() {
                assert!(reachable.contains(&key), "listed entry unreachable");
            } else {
                assert!(entry.prev.is_none() && entry.next.is_none());
                assert!(!reachable.contains(&key));
            }
            if !matches!(entry.notify, Notify::None) {
                assert!(entry.canceled, "notify installed on live entry");
            }
        }
    }
}

fn install_future(entry: &mut TimerEntry) -> Shared<oneshot::Receiver<()>> {
    let (tx, rx) = oneshot::channel();
    let shared = rx.shared();
    entry.notify = Notify::Future {
        tx,
        shared: shared.clone(),
    };
    shared
}

impl std::fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("TimerQueue")
            .field("active", &stats.active)
            .field("registered", &stats.registered)
            .field("armed_duration_ms", &stats.armed_duration_ms)
            .finish()
    }
}
