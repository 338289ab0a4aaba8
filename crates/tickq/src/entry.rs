//! Timer entry
//!
//! The per-timer record stored in the queue's slot map. Linkage is
//! expressed as slot-map keys rather than pointers: unlink and splice
//! stay O(1), membership is the `due_offset != INFINITE` sentinel, and
//! key versioning turns any stale worker-pool fire against a removed
//! entry into a silent miss.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::future::Shared;
use slotmap::new_key_type;

use crate::event::WaitEvent;

new_key_type! {
    /// Key addressing a timer entry in the queue's slot map.
    pub(crate) struct EntryKey;
}

/// Sentinel for "no due time" / "not periodic" / "nothing armed".
pub(crate) const INFINITE: u32 = u32::MAX;

/// Largest schedulable due time or period, in milliseconds.
pub const MAX_DUE_MS: u32 = u32::MAX - 1;

/// User callback. The opaque state argument of the classic
/// `(callback, state)` pair is captured by the closure.
pub(crate) type Callback = Arc<dyn Fn() + Send + Sync>;

/// Completion notification installed by a tracking dispose.
///
/// At most one of the variants is ever installed per entry; an external
/// event and a completion future are mutually exclusive for the entry's
/// whole lifetime.
pub(crate) enum Notify {
    None,
    Event(Arc<WaitEvent>),
    Future {
        tx: oneshot::Sender<()>,
        shared: Shared<oneshot::Receiver<()>>,
    },
}

pub(crate) struct TimerEntry {
    /// Milliseconds from `start_tick` at which the entry is due;
    /// `INFINITE` means detached.
    pub due_offset: u32,
    /// Repeat interval; `INFINITE` means one-shot.
    pub period: u32,
    /// Tick at which the current interval began.
    pub start_tick: u32,
    /// List linkage, valid only while linked.
    pub prev: Option<EntryKey>,
    pub next: Option<EntryKey>,
    pub callback: Callback,
    /// Captured ambient context; `None` invokes the callback raw.
    pub span: Option<tracing::Span>,
    /// Callbacks currently executing.
    pub in_flight: u32,
    pub canceled: bool,
    pub notify: Notify,
}

impl TimerEntry {
    /// A detached entry: linked only by a later `update`.
    pub fn new(callback: Callback, span: Option<tracing::Span>) -> Self {
        Self {
            due_offset: INFINITE,
            period: INFINITE,
            start_tick: 0,
            prev: None,
            next: None,
            callback,
            span,
            in_flight: 0,
            canceled: false,
            notify: Notify::None,
        }
    }

    #[inline]
    pub fn is_linked(&self) -> bool {
        self.due_offset != INFINITE
    }
}

/// Completion future returned by the asynchronous dispose surface.
///
/// Resolves once the timer is quiescent: canceled with no callback still
/// executing. Repeated asynchronous disposes of the same timer observe
/// the same underlying completion.
#[derive(Debug, Clone)]
pub struct Quiescence {
    // None = quiescent at dispose time.
    inner: Option<Shared<oneshot::Receiver<()>>>,
}

impl Quiescence {
    pub(crate) fn ready() -> Self {
        Self { inner: None }
    }

    pub(crate) fn pending(shared: Shared<oneshot::Receiver<()>>) -> Self {
        Self {
            inner: Some(shared),
        }
    }

    /// Non-blocking completion check.
    pub fn is_complete(&self) -> bool {
        match &self.inner {
            None => true,
            Some(shared) => shared.peek().is_some(),
        }
    }
}

impl Future for Quiescence {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match &mut self.get_mut().inner {
            None => Poll::Ready(()),
            // A dropped sender means the queue itself is gone; nothing
            // can be in flight, so that also counts as quiescent.
            Some(shared) => Pin::new(shared).poll(cx).map(|_| ()),
        }
    }
}
