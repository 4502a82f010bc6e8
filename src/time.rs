//! Event-time primitives: timestamps and clock extraction.
//!
//! Session windows are driven entirely by **event time** — the time an event
//! occurred at its source, not the wall-clock time it was processed. This
//! module provides [`EventTime`], the totally ordered timestamp attached to
//! every event, and [`EventClock`], the caller-supplied extractor that
//! derives an event's time from its payload.
//!
//! The extractor must be a pure, deterministic function of the event. An
//! event without a usable timestamp fails extraction with [`ClockError`];
//! the failure is fatal to that event only and never silently defaulted.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Event-time timestamp in milliseconds since an epoch chosen by the source.
///
/// Implements [`Ord`] and [`Default`] (0, the minimum) so it can be used as a
/// totally ordered timestamp. The epoch only has to be consistent within one
/// stream; Unix epoch milliseconds is the usual choice.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventTime(pub u64);

impl Default for EventTime {
    fn default() -> Self {
        Self(0)
    }
}

impl EventTime {
    /// Creates a new event time from raw milliseconds.
    #[inline]
    pub const fn new(ms: u64) -> Self {
        Self(ms)
    }

    /// Returns the raw millisecond value.
    #[inline]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Returns the minimum event time (same as `Default::default()`).
    #[inline]
    pub const fn minimum() -> Self {
        Self(0)
    }

    /// Returns this time advanced by `d`, saturating at the maximum.
    #[inline]
    pub fn advance(self, d: Duration) -> Self {
        Self(self.0.saturating_add(d.as_millis() as u64))
    }

    /// Returns this time moved back by `d`, saturating at the minimum.
    #[inline]
    pub fn rewind(self, d: Duration) -> Self {
        Self(self.0.saturating_sub(d.as_millis() as u64))
    }
}

impl std::fmt::Display for EventTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Error produced when an event's timestamp cannot be extracted.
///
/// Clock extraction failures are fatal to the affected event only: the event
/// is reported and skipped, open sessions are untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
    /// The event carries no usable timestamp field.
    #[error("event has no usable event time")]
    MissingEventTime,
    /// The event's timestamp field exists but could not be interpreted.
    #[error("invalid event time: {0}")]
    Invalid(String),
}

/// Trait for payload types that carry their own event time.
///
/// Implement this for events that have a meaningful occurrence time (a
/// `created_at` field, a log timestamp, a broker record timestamp). Return
/// milliseconds since the stream's epoch, or `None` if this particular event
/// has no event time.
pub trait HasEventTime {
    /// Returns the event time in milliseconds, or `None` if absent.
    fn event_time_ms(&self) -> Option<u64>;
}

/// Extracts an [`EventTime`] from an event payload.
///
/// Must be pure and deterministic: the same event always yields the same
/// time. Supplied by the caller; the engine never inspects payloads directly.
pub trait EventClock<E>: Send + Sync {
    /// Returns the event time for `event`, or a [`ClockError`] if the event
    /// lacks a usable timestamp.
    fn event_time(&self, event: &E) -> Result<EventTime, ClockError>;
}

/// Clock that reads the time from a [`HasEventTime`] payload.
///
/// `None` from [`HasEventTime::event_time_ms`] maps to
/// [`ClockError::MissingEventTime`].
#[derive(Clone, Copy, Debug, Default)]
pub struct PayloadClock;

impl<E: HasEventTime> EventClock<E> for PayloadClock {
    fn event_time(&self, event: &E) -> Result<EventTime, ClockError> {
        event
            .event_time_ms()
            .map(EventTime::new)
            .ok_or(ClockError::MissingEventTime)
    }
}

/// Wrapper that implements [`EventClock`] for plain closures.
#[derive(Clone)]
pub struct ClockFn<F> {
    function: F,
}

impl<E, F> EventClock<E> for ClockFn<F>
where
    F: Fn(&E) -> Result<EventTime, ClockError> + Send + Sync,
{
    fn event_time(&self, event: &E) -> Result<EventTime, ClockError> {
        (self.function)(event)
    }
}

/// Creates an [`EventClock`] from a closure.
pub fn clock_fn<E, F>(function: F) -> ClockFn<F>
where
    F: Fn(&E) -> Result<EventTime, ClockError> + Send + Sync,
{
    ClockFn { function }
}
