//! Caller-supplied aggregation of events into per-session accumulators.
//!
//! An [`Aggregator`] folds the events of one session into an accumulator:
//! `identity()` produces the empty accumulator and `fold(acc, event)` absorbs
//! one event. The fold is associative in sequence order but is **not**
//! required to be commutative — events are folded in arrival order within a
//! session, one thread per session, so no synchronization is needed.
//!
//! Event classification happens inside the fold by matching the event type's
//! variants exhaustively; the engine never inspects payloads at runtime.
//!
//! A fold failure poisons only the affected session: the session is discarded
//! un-emitted, the error is reported with its key, and the next event for
//! that key starts a fresh session.

use std::marker::PhantomData;
use thiserror::Error;

/// Error raised by an aggregation fold.
///
/// Poisons the session being folded; processing of other sessions and keys
/// continues unaffected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("fold error: {message}")]
pub struct FoldError {
  message: String,
}

impl FoldError {
  /// Creates a fold error with the given message.
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }

  /// Returns the error message.
  pub fn message(&self) -> &str {
    &self.message
  }
}

/// Associative-in-sequence accumulation of events into a session result.
///
/// One accumulator exists per open session. `fold` is only ever called from
/// a single thread per session; there is no concurrency requirement across
/// sessions.
pub trait Aggregator<E>: Send + Sync {
  /// Accumulator type carried by each open session and emitted on close.
  type Acc: Clone + Send + 'static;

  /// Returns the identity (empty) accumulator for a new session.
  fn identity(&self) -> Self::Acc;

  /// Folds one event into the accumulator, consuming and returning it.
  fn fold(&self, acc: Self::Acc, event: &E) -> Result<Self::Acc, FoldError>;
}

/// Wrapper that implements [`Aggregator`] for a pair of closures.
pub struct FoldFn<Acc, I, F> {
  identity: I,
  fold: F,
  _marker: PhantomData<fn() -> Acc>,
}

impl<Acc: Clone, I: Clone, F: Clone> Clone for FoldFn<Acc, I, F> {
  fn clone(&self) -> Self {
    Self {
      identity: self.identity.clone(),
      fold: self.fold.clone(),
      _marker: PhantomData,
    }
  }
}

impl<E, Acc, I, F> Aggregator<E> for FoldFn<Acc, I, F>
where
  Acc: Clone + Send + 'static,
  I: Fn() -> Acc + Send + Sync,
  F: Fn(Acc, &E) -> Result<Acc, FoldError> + Send + Sync,
{
  type Acc = Acc;

  fn identity(&self) -> Acc {
    (self.identity)()
  }

  fn fold(&self, acc: Acc, event: &E) -> Result<Acc, FoldError> {
    (self.fold)(acc, event)
  }
}

/// Creates an [`Aggregator`] from an identity closure and a fold closure.
pub fn fold_fn<E, Acc, I, F>(identity: I, fold: F) -> FoldFn<Acc, I, F>
where
  Acc: Clone + Send + 'static,
  I: Fn() -> Acc + Send + Sync,
  F: Fn(Acc, &E) -> Result<Acc, FoldError> + Send + Sync,
{
  FoldFn {
    identity,
    fold,
    _marker: PhantomData,
  }
}
