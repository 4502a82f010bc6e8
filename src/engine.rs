//! # Session Windowing Engine
//!
//! Groups a per-key stream of timestamped events into gap-based session
//! windows, folds each window into an accumulator, and emits one result per
//! closed window.
//!
//! ## Behavior
//!
//! For each `(key, event)`:
//!
//! - The event time `t` comes from the caller-supplied clock; extraction
//!   failure skips the event only.
//! - `t` feeds the watermark tracker; the watermark `w` is the maximum
//!   observed time minus the lateness allowance.
//! - If the key's open session has `last_event_time + gap ≥ t`, the event
//!   folds into it (an event exactly `gap` after the last one is inside).
//! - Otherwise the event needs a new session. If `t < w` it is late — routed
//!   to the late-data side channel; a closed session is never reopened. If
//!   `t ≥ w` a fresh session opens (closing the gap-expired one, if any).
//! - Every session with `last_event_time + gap ≤ w` then closes and is
//!   emitted, ordered by `(start_time, key)`.
//!
//! Closure is driven purely by the watermark, never by wall-clock timers, so
//! the outputs are fully determined by the event-time content of the stream
//! and independent of processing speed.
//!
//! One engine instance owns the state of exactly one input partition and is
//! mutated by a single sequence of steps; there are no concurrent writers
//! and no locks.

use crate::checkpoint::PartitionSnapshot;
use crate::config::EngineConfig;
use crate::fold::{Aggregator, FoldError};
use crate::session::{ClosedSession, OpenSession, SessionTable};
use crate::source::{Cursor, PartitionId};
use crate::time::{ClockError, EventClock, EventTime};
use crate::watermark::WatermarkTracker;
use std::hash::Hash;
use std::marker::PhantomData;
use std::time::Duration;

/// Everything one processing step produced.
///
/// Recoverable per-event outcomes never halt the partition; they are
/// surfaced here for the caller to forward to the sink, the late-data
/// channel, or its error reporting.
#[derive(Debug)]
pub struct StepOutput<K, E, Acc> {
    /// Sessions closed by this step, ordered by `(start_time, key)`.
    pub closed: Vec<ClosedSession<K, Acc>>,
    /// The event, if it was late: behind the watermark with no open session
    /// left to extend.
    pub late: Option<(K, E)>,
    /// Fold failure that poisoned the key's session, if any.
    pub fold_failure: Option<(K, FoldError)>,
    /// Clock extraction failure, if any; the event is returned untouched.
    pub clock_failure: Option<(K, E, ClockError)>,
}

impl<K, E, Acc> StepOutput<K, E, Acc> {
    fn empty() -> Self {
        Self {
            closed: Vec::new(),
            late: None,
            fold_failure: None,
            clock_failure: None,
        }
    }
}

/// Event-time session windowing engine for one input partition.
///
/// Owns the partition's session table, watermark tracker, and input cursor;
/// the state is passed through [`step`](SessionEngine::step), never shared.
/// Snapshot and restore capture all three as one unit so that replaying
/// events from the snapshot's cursor reproduces the same session closures as
/// an uninterrupted run.
pub struct SessionEngine<K, E, C, A>
where
    C: EventClock<E>,
    A: Aggregator<E>,
{
    partition: PartitionId,
    gap: Duration,
    clock: C,
    aggregator: A,
    watermark: WatermarkTracker,
    table: SessionTable<K, A::Acc>,
    cursor: Cursor,
    _events: PhantomData<fn(E)>,
}

impl<K, E, C, A> SessionEngine<K, E, C, A>
where
    K: Hash + Eq + Ord + Clone,
    C: EventClock<E>,
    A: Aggregator<E>,
{
    /// Creates an engine with empty state for `partition`.
    pub fn new(partition: PartitionId, config: &EngineConfig, clock: C, aggregator: A) -> Self {
        Self {
            partition,
            gap: config.gap,
            clock,
            aggregator,
            watermark: WatermarkTracker::new(config.allowed_lateness),
            table: SessionTable::new(),
            cursor: Cursor::Earliest,
            _events: PhantomData,
        }
    }

    /// Rebuilds an engine from a checkpoint snapshot.
    ///
    /// Replaying records from [`cursor`](SessionEngine::cursor) onward then
    /// yields exactly the closures an uninterrupted run would have produced,
    /// because folding is deterministic and sessions are keyed purely by
    /// event time.
    pub fn restore(
        config: &EngineConfig,
        clock: C,
        aggregator: A,
        snapshot: PartitionSnapshot<K, A::Acc>,
    ) -> Self {
        Self {
            partition: snapshot.partition,
            gap: config.gap,
            clock,
            aggregator,
            watermark: WatermarkTracker::from_snapshot(config.allowed_lateness, &snapshot.watermark),
            table: SessionTable::from_entries(snapshot.sessions),
            cursor: snapshot.cursor,
            _events: PhantomData,
        }
    }

    /// Processes one `(key, event)` record.
    ///
    /// `cursor` is the input position *after* this record; it is stored so a
    /// snapshot taken between steps means "everything up to and including
    /// this cursor has been fully folded, nothing beyond it".
    pub fn step(&mut self, key: K, event: E, cursor: Cursor) -> StepOutput<K, E, A::Acc> {
        let mut out = StepOutput::empty();
        self.cursor = cursor;

        let t = match self.clock.event_time(&event) {
            Ok(t) => t,
            Err(err) => {
                tracing::error!(
                    partition = %self.partition,
                    error = %err,
                    "event time extraction failed; event skipped"
                );
                out.clock_failure = Some((key, event, err));
                return out;
            }
        };

        self.watermark.observe(t);
        let w = self.watermark.current();

        match self.table.take(&key) {
            // Inside the open session; the boundary (t exactly gap after the
            // last event) still belongs to it.
            Some(session) if t <= session.last_event_time.advance(self.gap) => {
                let OpenSession {
                    start_time,
                    last_event_time,
                    accumulator,
                } = session;
                match self.aggregator.fold(accumulator, &event) {
                    Ok(acc) => self.table.insert(
                        key,
                        OpenSession {
                            start_time,
                            last_event_time: last_event_time.max(t),
                            accumulator: acc,
                        },
                    ),
                    Err(err) => {
                        tracing::warn!(
                            partition = %self.partition,
                            error = %err,
                            "fold failed; session poisoned and discarded"
                        );
                        out.fold_failure = Some((key, err));
                    }
                }
            }
            // No open session accepts the event: it needs a new one.
            old => {
                if t < w {
                    // Late: its window presumably closed already. Never
                    // reopen; route to the side channel. A gap-expired open
                    // session goes back for the sweep below (w is past its
                    // deadline, so it closes this same step).
                    if let Some(session) = old {
                        self.table.insert(key.clone(), session);
                    }
                    tracing::debug!(partition = %self.partition, time = %t, watermark = %w, "late event");
                    out.late = Some((key, event));
                } else {
                    if let Some(session) = old {
                        // Gap exceeded by arrival time even though the
                        // watermark has not caught up yet.
                        out.closed.push(ClosedSession {
                            key: key.clone(),
                            start_time: session.start_time,
                            last_event_time: session.last_event_time,
                            accumulator: session.accumulator,
                        });
                    }
                    match self.aggregator.fold(self.aggregator.identity(), &event) {
                        Ok(acc) => self.table.open(key, t, acc),
                        Err(err) => {
                            tracing::warn!(
                                partition = %self.partition,
                                error = %err,
                                "fold failed on first event; session poisoned"
                            );
                            out.fold_failure = Some((key, err));
                        }
                    }
                }
            }
        }

        out.closed.extend(self.table.drain_expired(w, self.gap));
        if out.closed.len() > 1 {
            out.closed
                .sort_by(|a, b| (a.start_time, &a.key).cmp(&(b.start_time, &b.key)));
        }
        out
    }

    /// Closes every remaining open session at end of input, as if the
    /// watermark advanced past all of them. Ordered by `(start_time, key)`.
    pub fn finish(&mut self) -> Vec<ClosedSession<K, A::Acc>> {
        self.table.drain_all()
    }

    /// Captures the session table, watermark, and input cursor as one
    /// immutable snapshot.
    ///
    /// Must be called between steps — never with an event mid-fold — so the
    /// snapshot is consistent with its cursor.
    pub fn snapshot(&self) -> PartitionSnapshot<K, A::Acc> {
        PartitionSnapshot {
            partition: self.partition.clone(),
            watermark: self.watermark.snapshot(),
            sessions: self.table.entries(),
            cursor: self.cursor.clone(),
        }
    }

    /// The partition this engine owns.
    pub fn partition(&self) -> &PartitionId {
        &self.partition
    }

    /// Current watermark.
    pub fn watermark(&self) -> EventTime {
        self.watermark.current()
    }

    /// Lag between the latest observed event time and the watermark.
    pub fn watermark_lag(&self) -> Duration {
        self.watermark.lag()
    }

    /// Input position after the last processed record.
    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// Number of currently open sessions.
    pub fn open_sessions(&self) -> usize {
        self.table.len()
    }
}
