//! Per-key session state: open sessions, closed results, and the table.
//!
//! A session is open from the first event that creates it until the gap rule
//! and the watermark close it. Each key has at most one open session; a
//! closed session is never reopened — a later event for the same key starts
//! a new one. The table holds only keys with currently open sessions, so its
//! size is bounded by concurrently active keys, not by total keys seen.

use crate::time::EventTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

/// State of one open session: window bounds so far plus the accumulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSession<A> {
    /// Event time of the first event in the session.
    pub start_time: EventTime,
    /// Maximum event time seen so far (not arrival order).
    pub last_event_time: EventTime,
    /// Fold accumulator over the session's events.
    pub accumulator: A,
}

/// A completed session, emitted downstream exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedSession<K, A> {
    /// Routing key the session belongs to.
    pub key: K,
    /// Event time of the first event in the session.
    pub start_time: EventTime,
    /// Maximum event time seen in the session.
    pub last_event_time: EventTime,
    /// Final fold result.
    pub accumulator: A,
}

/// Serialized form of one open session, persisted in checkpoints.
///
/// Entries are stored as a sorted vector rather than a map so the snapshot
/// bytes are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEntry<K, A> {
    /// Routing key.
    pub key: K,
    /// Event time of the first event in the session.
    pub start_time: EventTime,
    /// Maximum event time seen so far.
    pub last_event_time: EventTime,
    /// Fold accumulator state.
    pub accumulator: A,
}

/// Map from routing key to the single open session for that key.
#[derive(Debug, Clone, Default)]
pub struct SessionTable<K, A> {
    sessions: HashMap<K, OpenSession<A>>,
}

impl<K, A> SessionTable<K, A>
where
    K: Hash + Eq + Ord + Clone,
    A: Clone,
{
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Number of currently open sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if no session is open.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Returns the open session for `key`, if any.
    pub fn get(&self, key: &K) -> Option<&OpenSession<A>> {
        self.sessions.get(key)
    }

    /// Removes and returns the open session for `key`, if any.
    pub fn take(&mut self, key: &K) -> Option<OpenSession<A>> {
        self.sessions.remove(key)
    }

    /// Inserts (or replaces) the open session for `key`.
    pub fn insert(&mut self, key: K, session: OpenSession<A>) {
        self.sessions.insert(key, session);
    }

    /// Opens a fresh session for `key` starting at `t`.
    pub fn open(&mut self, key: K, t: EventTime, accumulator: A) {
        self.sessions.insert(
            key,
            OpenSession {
                start_time: t,
                last_event_time: t,
                accumulator,
            },
        );
    }

    /// Removes every session whose inactivity gap has fully elapsed under
    /// watermark `w` (`last_event_time + gap ≤ w`) and returns them as closed
    /// sessions, ordered by `(start_time, key)`.
    ///
    /// Sessions for different keys close independently; per key, closures
    /// come out in non-decreasing `start_time` order.
    pub fn drain_expired(&mut self, w: EventTime, gap: Duration) -> Vec<ClosedSession<K, A>> {
        let expired: Vec<K> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.last_event_time.advance(gap) <= w)
            .map(|(k, _)| k.clone())
            .collect();

        let mut closed: Vec<ClosedSession<K, A>> = expired
            .into_iter()
            .filter_map(|key| {
                self.sessions.remove(&key).map(|s| ClosedSession {
                    key,
                    start_time: s.start_time,
                    last_event_time: s.last_event_time,
                    accumulator: s.accumulator,
                })
            })
            .collect();
        closed.sort_by(|a, b| (a.start_time, &a.key).cmp(&(b.start_time, &b.key)));
        closed
    }

    /// Removes and returns every open session, ordered by `(start_time, key)`.
    ///
    /// Used at end of input, where the watermark is taken to infinity.
    pub fn drain_all(&mut self) -> Vec<ClosedSession<K, A>> {
        let mut closed: Vec<ClosedSession<K, A>> = self
            .sessions
            .drain()
            .map(|(key, s)| ClosedSession {
                key,
                start_time: s.start_time,
                last_event_time: s.last_event_time,
                accumulator: s.accumulator,
            })
            .collect();
        closed.sort_by(|a, b| (a.start_time, &a.key).cmp(&(b.start_time, &b.key)));
        closed
    }

    /// Returns the table contents as snapshot entries, sorted by key.
    pub fn entries(&self) -> Vec<SessionEntry<K, A>> {
        let mut entries: Vec<SessionEntry<K, A>> = self
            .sessions
            .iter()
            .map(|(key, s)| SessionEntry {
                key: key.clone(),
                start_time: s.start_time,
                last_event_time: s.last_event_time,
                accumulator: s.accumulator.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// Rebuilds a table from snapshot entries.
    pub fn from_entries(entries: Vec<SessionEntry<K, A>>) -> Self {
        let sessions = entries
            .into_iter()
            .map(|e| {
                (
                    e.key,
                    OpenSession {
                        start_time: e.start_time,
                        last_event_time: e.last_event_time,
                        accumulator: e.accumulator,
                    },
                )
            })
            .collect();
        Self { sessions }
    }
}
