//! Per-partition watermark tracking.
//!
//! A watermark `W` is a monotonic lower bound asserting that no further
//! events with time ≤ `W` are expected. It is derived from the maximum event
//! time observed on the partition minus a configured lateness allowance:
//! with `allowed_lateness = 0` the watermark tracks the latest event time
//! exactly and sessions close as soon as a gap is observed; with a positive
//! allowance the watermark lags behind, giving late-arriving events a grace
//! window in which they can still extend a session.
//!
//! The tracker is deterministic: it depends only on the event times fed to
//! [`WatermarkTracker::observe`], never on wall-clock time.

use crate::time::EventTime;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Monotonic watermark estimate for a single input partition.
#[derive(Debug, Clone)]
pub struct WatermarkTracker {
    max_seen: Option<EventTime>,
    allowed_lateness: Duration,
}

impl WatermarkTracker {
    /// Creates a tracker with the given lateness allowance and no events
    /// observed yet.
    pub fn new(allowed_lateness: Duration) -> Self {
        Self {
            max_seen: None,
            allowed_lateness,
        }
    }

    /// Records an observed event time. The maximum seen time only moves
    /// forward; observing an older time has no effect.
    pub fn observe(&mut self, t: EventTime) {
        self.max_seen = Some(match self.max_seen {
            Some(m) => m.max(t),
            None => t,
        });
    }

    /// Returns the current watermark: `max_seen − allowed_lateness`, or the
    /// minimum time before any event has been observed.
    pub fn current(&self) -> EventTime {
        match self.max_seen {
            Some(m) => m.rewind(self.allowed_lateness),
            None => EventTime::minimum(),
        }
    }

    /// Returns the maximum event time observed, if any.
    pub fn max_seen(&self) -> Option<EventTime> {
        self.max_seen
    }

    /// Lag between the latest observed event time and the watermark.
    ///
    /// Equals the lateness allowance once at least one event has been seen;
    /// exposed for telemetry.
    pub fn lag(&self) -> Duration {
        match self.max_seen {
            Some(m) => Duration::from_millis(m.as_millis() - self.current().as_millis()),
            None => Duration::ZERO,
        }
    }

    /// Serializes the tracker state for a checkpoint.
    ///
    /// The lateness allowance is configuration, not state; it is supplied
    /// again on restore.
    pub fn snapshot(&self) -> WatermarkSnapshot {
        WatermarkSnapshot {
            max_seen: self.max_seen,
        }
    }

    /// Restores a tracker from a checkpoint snapshot.
    pub fn from_snapshot(allowed_lateness: Duration, snapshot: &WatermarkSnapshot) -> Self {
        Self {
            max_seen: snapshot.max_seen,
            allowed_lateness,
        }
    }
}

/// Serialized watermark state persisted in checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WatermarkSnapshot {
    /// Maximum event time observed on the partition, if any.
    pub max_seen: Option<EventTime>,
}
