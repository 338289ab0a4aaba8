//! Error types for the timer surface

use thiserror::Error;

/// Errors returned by the public timer surface.
///
/// Queue-internal failures (degenerate arming values, broken linkage) are
/// programming errors and assert instead of surfacing here.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// A due time or period was outside the accepted bounds for the
    /// chosen surface. Signed inputs accept `-1` (disabled) through
    /// `0xFFFF_FFFE` milliseconds.
    #[error("due or period out of range: {millis} ms")]
    OutOfRange {
        /// The offending value, in milliseconds.
        millis: i128,
    },

    /// The timer was changed after it had been disposed.
    #[error("timer has been disposed")]
    Disposed,

    /// A second completion-tracking dispose was attempted after a
    /// signal-based dispose already claimed the notification slot.
    #[error("timer already closed")]
    AlreadyClosed,
}
