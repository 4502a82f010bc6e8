//! Engine configuration: gap, lateness allowance, checkpoint cadence.

use std::time::Duration;
use thiserror::Error;

/// Error raised when a configuration is invalid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
  /// The session gap must be greater than zero.
  #[error("session gap must be non-zero")]
  ZeroGap,
  /// An event-count checkpoint cadence must be greater than zero.
  #[error("checkpoint cadence of zero events")]
  ZeroCadence,
}

/// When automatic checkpoints are taken.
///
/// Cadence only schedules snapshots; it never influences window semantics,
/// which are driven purely by event time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckpointCadence {
  /// No automatic checkpoints; only the final snapshot at shutdown or end of
  /// input.
  #[default]
  Disabled,
  /// Checkpoint after every `n` processed events (per partition).
  EveryEvents(u64),
  /// Checkpoint on a wall-clock interval.
  Every(Duration),
}

/// Retry policy for persisting snapshots.
///
/// A failed save is retried with exponential backoff; once `max_retries` is
/// exhausted the failure becomes fatal to the whole flow, since recovery
/// guarantees can no longer be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Maximum number of retries after the initial attempt.
  pub max_retries: u32,
  /// Backoff before the first retry; doubles on each subsequent one.
  pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 3,
      initial_backoff: Duration::from_millis(100),
    }
  }
}

impl RetryPolicy {
  /// Backoff before retry number `attempt` (1-based).
  pub fn backoff(&self, attempt: u32) -> Duration {
    self.initial_backoff.saturating_mul(1u32 << (attempt - 1).min(16))
  }
}

/// Configuration for a session windowing flow.
#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// Inactivity threshold that closes a session: a new event more than `gap`
  /// after a session's last event starts a new session. An event arriving
  /// exactly `gap` after the last one is still inside the session.
  pub gap: Duration,
  /// Grace period before final closure; the watermark lags the maximum
  /// observed event time by this much. Zero (the default) assumes in-order
  /// arrival and closes sessions as soon as a gap is observed.
  pub allowed_lateness: Duration,
  /// Cadence of automatic snapshots.
  pub checkpoint: CheckpointCadence,
  /// Retry policy for snapshot persistence.
  pub snapshot_retry: RetryPolicy,
}

impl EngineConfig {
  /// Creates a configuration with the given session gap, zero lateness
  /// allowance, and no automatic checkpoints.
  pub fn new(gap: Duration) -> Self {
    Self {
      gap,
      allowed_lateness: Duration::ZERO,
      checkpoint: CheckpointCadence::Disabled,
      snapshot_retry: RetryPolicy::default(),
    }
  }

  /// Sets the allowed lateness.
  #[must_use]
  pub fn with_allowed_lateness(mut self, allowed_lateness: Duration) -> Self {
    self.allowed_lateness = allowed_lateness;
    self
  }

  /// Sets the checkpoint cadence.
  #[must_use]
  pub fn with_checkpoint(mut self, cadence: CheckpointCadence) -> Self {
    self.checkpoint = cadence;
    self
  }

  /// Sets the snapshot retry policy.
  #[must_use]
  pub fn with_snapshot_retry(mut self, retry: RetryPolicy) -> Self {
    self.snapshot_retry = retry;
    self
  }

  /// Validates the configuration.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.gap.is_zero() {
      return Err(ConfigError::ZeroGap);
    }
    if matches!(self.checkpoint, CheckpointCadence::EveryEvents(0)) {
      return Err(ConfigError::ZeroCadence);
    }
    Ok(())
  }
}
