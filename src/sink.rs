//! Output sinks for closed sessions and the late-data side channel.
//!
//! An [`OutputSink`] receives every closed session exactly once via
//! [`emit`](OutputSink::emit), and every late event — one whose time fell
//! behind the watermark after its window's presumed closure — via
//! [`emit_late`](OutputSink::emit_late). Late data is routed, never silently
//! dropped, and never reopens a closed session.
//!
//! Each partition writes to its own sink instance, so implementations need
//! no internal synchronization.

use crate::session::ClosedSession;
use async_trait::async_trait;
use thiserror::Error;

/// Error raised by a sink implementation.
///
/// Sink failures are fatal to the partition that hit them: emission is the
/// flow's output contract, so it is not silently skipped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("sink error: {0}")]
pub struct SinkError(pub String);

impl SinkError {
  /// Creates a sink error with the given message.
  pub fn new(message: impl Into<String>) -> Self {
    Self(message.into())
  }
}

/// Receives closed sessions and late events from the engine.
#[async_trait]
pub trait OutputSink<K, E, Acc>: Send {
  /// Delivers one closed session. Called exactly once per session.
  async fn emit(&mut self, session: ClosedSession<K, Acc>) -> Result<(), SinkError>;

  /// Delivers one late event on the side channel.
  async fn emit_late(&mut self, key: K, event: E) -> Result<(), SinkError>;
}

/// Sink that collects everything in memory. Intended for tests and demos.
#[derive(Debug, Default)]
pub struct VecSink<K, E, Acc> {
  /// Closed sessions, in emission order.
  pub sessions: Vec<ClosedSession<K, Acc>>,
  /// Late events, in arrival order.
  pub late: Vec<(K, E)>,
}

impl<K, E, Acc> VecSink<K, E, Acc> {
  /// Creates an empty collecting sink.
  pub fn new() -> Self {
    Self {
      sessions: Vec::new(),
      late: Vec::new(),
    }
  }
}

#[async_trait]
impl<K, E, Acc> OutputSink<K, E, Acc> for VecSink<K, E, Acc>
where
  K: Send,
  E: Send,
  Acc: Send,
{
  async fn emit(&mut self, session: ClosedSession<K, Acc>) -> Result<(), SinkError> {
    self.sessions.push(session);
    Ok(())
  }

  async fn emit_late(&mut self, key: K, event: E) -> Result<(), SinkError> {
    self.late.push((key, event));
    Ok(())
  }
}

/// Sink that logs emissions through `tracing`.
///
/// The stand-in for "print results" demos: closed sessions at `info`, late
/// events at `warn`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl<K, E, Acc> OutputSink<K, E, Acc> for TracingSink
where
  K: std::fmt::Debug + Send + 'static,
  E: std::fmt::Debug + Send + 'static,
  Acc: std::fmt::Debug + Send + 'static,
{
  async fn emit(&mut self, session: ClosedSession<K, Acc>) -> Result<(), SinkError> {
    tracing::info!(
      key = ?session.key,
      start = %session.start_time,
      last = %session.last_event_time,
      result = ?session.accumulator,
      "session closed"
    );
    Ok(())
  }

  async fn emit_late(&mut self, key: K, event: E) -> Result<(), SinkError> {
    tracing::warn!(key = ?key, event = ?event, "late event routed to side channel");
    Ok(())
  }
}
