//! Top-level error taxonomy for session windowing flows.
//!
//! Recoverable, per-event conditions (clock extraction failures, fold
//! poisoning, late data) never halt a partition; they are surfaced through
//! [`StepOutput`](crate::engine::StepOutput) and this module's types only
//! classify them. The variants here that end a flow are the unrecoverable
//! ones: snapshot retry exhaustion, restore failures, and source/sink
//! failures.

use crate::checkpoint::{RestoreError, SnapshotError};
use crate::config::ConfigError;
use crate::fold::FoldError;
use crate::sink::SinkError;
use crate::source::SourceError;
use crate::time::ClockError;
use thiserror::Error;

/// Error type for a session windowing flow.
#[derive(Error, Debug)]
pub enum EngineError {
  /// An event's timestamp could not be extracted.
  #[error(transparent)]
  Clock(#[from] ClockError),

  /// An aggregation fold failed.
  #[error(transparent)]
  Fold(#[from] FoldError),

  /// A snapshot could not be captured or persisted.
  #[error(transparent)]
  Snapshot(#[from] SnapshotError),

  /// Snapshot persistence kept failing after all configured retries.
  ///
  /// Fatal: once a checkpoint cannot be written, the recovery contract can
  /// no longer be honored.
  #[error("snapshot failed after {attempts} attempts: {source}")]
  SnapshotExhausted {
    /// Total save attempts, including the first.
    attempts: usize,
    /// The final save failure.
    source: SnapshotError,
  },

  /// Restoring from a checkpoint failed. Fatal at startup.
  #[error(transparent)]
  Restore(#[from] RestoreError),

  /// The input source failed.
  #[error(transparent)]
  Source(#[from] SourceError),

  /// The output sink failed.
  #[error(transparent)]
  Sink(#[from] SinkError),

  /// The configuration is invalid.
  #[error(transparent)]
  Config(#[from] ConfigError),

  /// A partition worker ended abnormally (panic or cancellation).
  #[error("partition worker failed: {0}")]
  Worker(String),
}
