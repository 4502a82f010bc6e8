//! Partitioned, resumable input sources.
//!
//! A [`PartitionedSource`] yields `(key, event)` records per partition and
//! exposes a resumable [`Cursor`] so that a restarted flow can continue from
//! its last checkpoint without duplicating or losing records. The cursor's
//! internal meaning is owned by the source — the engine only stores and
//! returns it — so any source can define its own notion of position
//! (sequence number, broker offset, file position).
//!
//! [`VecSource`] is the built-in in-memory implementation used by tests and
//! demos: a single partition over a vector, resumable by index.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::sync::Arc;
use thiserror::Error;

/// Identifier for one input partition.
///
/// Partitions are independent: each has its own watermark, session table,
/// and cursor, and is processed by a single logical stream of control.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId(pub String);

impl PartitionId {
  /// Creates a new partition id.
  pub fn new(s: impl Into<String>) -> Self {
    Self(s.into())
  }

  /// Returns the id as a string slice.
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl From<&str> for PartitionId {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

impl From<String> for PartitionId {
  fn from(s: String) -> Self {
    Self(s)
  }
}

impl Display for PartitionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Resumable position within one partition.
///
/// Opaque to the engine: it is captured in checkpoints and handed back to
/// [`PartitionedSource::open`] on restart, nothing more. Sources pick the
/// representation that fits their storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Cursor {
  /// The beginning of the partition.
  #[default]
  Earliest,
  /// Number of records already consumed; resume skips that many.
  Sequence(u64),
  /// Source-defined position string (e.g. a broker offset token).
  Custom(String),
}

impl Display for Cursor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Cursor::Earliest => write!(f, "earliest"),
      Cursor::Sequence(n) => write!(f, "seq:{}", n),
      Cursor::Custom(s) => write!(f, "custom:{}", s),
    }
  }
}

/// Error raised by a source implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("source error: {0}")]
pub struct SourceError(pub String);

impl SourceError {
  /// Creates a source error with the given message.
  pub fn new(message: impl Into<String>) -> Self {
    Self(message.into())
  }
}

/// A partitioned input of `(key, event)` records with resumable positions.
#[async_trait]
pub trait PartitionedSource<K, E>: Send + Sync {
  /// Reader for one partition.
  type Handle: SourceHandle<K, E>;

  /// Lists the partitions this source produces.
  async fn list_partitions(&self) -> Result<Vec<PartitionId>, SourceError>;

  /// Opens a reader on `partition`, resuming from `resume` if given
  /// (otherwise from the earliest position).
  async fn open(
    &self,
    partition: &PartitionId,
    resume: Option<Cursor>,
  ) -> Result<Self::Handle, SourceError>;
}

/// Reader for one partition of a [`PartitionedSource`].
#[async_trait]
pub trait SourceHandle<K, E>: Send {
  /// Returns the next record, or `None` at end of partition.
  ///
  /// May suspend waiting for upstream data; that suspension is a cooperative
  /// yield point, so the returned future must be cancel-safe (dropping it
  /// must not lose a record).
  async fn next(&mut self) -> Result<Option<(K, E)>, SourceError>;

  /// Returns the position after the last record delivered by [`next`].
  ///
  /// Opening a new handle with this cursor continues exactly where this one
  /// left off.
  ///
  /// [`next`]: SourceHandle::next
  fn cursor(&self) -> Cursor;
}

/// In-memory single-partition source over a vector of records.
///
/// Resumable by index via [`Cursor::Sequence`]; replaying from a saved cursor
/// re-delivers exactly the records after it. Intended for tests and demos.
#[derive(Clone)]
pub struct VecSource<K, E> {
  partition: PartitionId,
  records: Arc<Vec<(K, E)>>,
}

impl<K, E> VecSource<K, E> {
  /// Creates a source over `records` with the default partition id
  /// `"partition-0"`.
  pub fn new(records: Vec<(K, E)>) -> Self {
    Self {
      partition: PartitionId::new("partition-0"),
      records: Arc::new(records),
    }
  }

  /// Sets the partition id.
  #[must_use]
  pub fn with_partition(mut self, partition: impl Into<PartitionId>) -> Self {
    self.partition = partition.into();
    self
  }
}

#[async_trait]
impl<K, E> PartitionedSource<K, E> for VecSource<K, E>
where
  K: Clone + Send + Sync + 'static,
  E: Clone + Send + Sync + 'static,
{
  type Handle = VecSourceHandle<K, E>;

  async fn list_partitions(&self) -> Result<Vec<PartitionId>, SourceError> {
    Ok(vec![self.partition.clone()])
  }

  async fn open(
    &self,
    partition: &PartitionId,
    resume: Option<Cursor>,
  ) -> Result<Self::Handle, SourceError> {
    if *partition != self.partition {
      return Err(SourceError::new(format!("unknown partition: {}", partition)));
    }
    let next_index = match resume.unwrap_or_default() {
      Cursor::Earliest => 0,
      Cursor::Sequence(n) => n as usize,
      Cursor::Custom(s) => {
        return Err(SourceError::new(format!(
          "unsupported cursor for in-memory source: custom:{}",
          s
        )));
      }
    };
    Ok(VecSourceHandle {
      records: Arc::clone(&self.records),
      next_index,
    })
  }
}

/// Reader over a [`VecSource`] partition.
#[derive(Debug)]
pub struct VecSourceHandle<K, E> {
  records: Arc<Vec<(K, E)>>,
  next_index: usize,
}

#[async_trait]
impl<K, E> SourceHandle<K, E> for VecSourceHandle<K, E>
where
  K: Clone + Send + Sync + 'static,
  E: Clone + Send + Sync + 'static,
{
  async fn next(&mut self) -> Result<Option<(K, E)>, SourceError> {
    match self.records.get(self.next_index) {
      Some(record) => {
        self.next_index += 1;
        Ok(Some(record.clone()))
      }
      None => Ok(None),
    }
  }

  fn cursor(&self) -> Cursor {
    Cursor::Sequence(self.next_index as u64)
  }
}
