//! Partitioned flow runtime: one worker per partition, coordinated
//! checkpoints, graceful shutdown.
//!
//! Each input partition is processed by exactly one tokio task owning that
//! partition's [`SessionEngine`], source handle, and sink — partitions share
//! no mutable state, so no locking is needed inside one. Only checkpoint
//! assembly synchronizes across partitions: the driver asks every worker for
//! a snapshot, each worker answers at its next quiescent point (between
//! events, never mid-fold), and the combined unit is committed atomically.
//!
//! Shutdown lets the in-flight event finish folding, then takes a final
//! snapshot before releasing the workers; no partial-event state is ever
//! checkpointed. End of a partition drains its remaining open sessions
//! before the final snapshot.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sessionweave::checkpoint::InMemoryCheckpointStorage;
//! use sessionweave::config::EngineConfig;
//! use sessionweave::fold::{FoldError, fold_fn};
//! use sessionweave::runtime::{SessionFlow, shutdown_channel};
//! use sessionweave::sink::VecSink;
//! use sessionweave::source::VecSource;
//! use sessionweave::time::{EventTime, clock_fn};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let records: Vec<(String, (u64, u32))> =
//!     vec![("user-1".into(), (5_000, 1)), ("user-1".into(), (6_000, 2))];
//!
//! let flow = SessionFlow::new(
//!     VecSource::new(records),
//!     clock_fn(|e: &(u64, u32)| Ok(EventTime::new(e.0))),
//!     fold_fn(Vec::new, |mut acc: Vec<u32>, e: &(u64, u32)| {
//!         acc.push(e.1);
//!         Ok::<_, FoldError>(acc)
//!     }),
//!     EngineConfig::new(Duration::from_secs(5)),
//!     Arc::new(InMemoryCheckpointStorage::new()),
//! )?;
//!
//! let (_shutdown_tx, shutdown_rx) = shutdown_channel();
//! let summary = flow.run(|_partition| VecSink::new(), shutdown_rx).await?;
//! println!("emitted {} sessions", summary.sessions_emitted);
//! # Ok(())
//! # }
//! ```

use crate::checkpoint::{
  CheckpointCoordinator, CheckpointId, CheckpointStorage, PartitionSnapshot,
};
use crate::config::{CheckpointCadence, EngineConfig};
use crate::engine::{SessionEngine, StepOutput};
use crate::error::EngineError;
use crate::fold::Aggregator;
use crate::sink::OutputSink;
use crate::source::{Cursor, PartitionId, PartitionedSource, SourceHandle};
use crate::time::EventClock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;

/// Creates the shutdown signal pair for [`SessionFlow::run`].
///
/// Send `true` through the sender to request a graceful stop. Dropping the
/// sender without signaling lets the flow run to end of input.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
  watch::channel(false)
}

/// What a completed flow did, plus its final checkpoint.
#[derive(Debug, Clone, Default)]
pub struct FlowSummary {
  /// Number of partitions processed.
  pub partitions: usize,
  /// Closed sessions delivered to sinks.
  pub sessions_emitted: u64,
  /// Events routed to the late-data side channel.
  pub late_events: u64,
  /// Sessions poisoned by fold failures (discarded un-emitted).
  pub fold_failures: u64,
  /// Events skipped because their timestamp could not be extracted.
  pub clock_failures: u64,
  /// Final checkpoint, if any partition produced state to capture.
  pub final_checkpoint: Option<CheckpointId>,
}

/// Request for one partition's snapshot at its next quiescent point.
struct SnapshotRequest<K, A> {
  reply: oneshot::Sender<PartitionSnapshot<K, A>>,
}

#[derive(Default)]
struct Tallies {
  sessions_emitted: u64,
  late_events: u64,
  fold_failures: u64,
  clock_failures: u64,
}

struct WorkerReport<K, A> {
  snapshot: PartitionSnapshot<K, A>,
  tallies: Tallies,
}

/// A configured session windowing flow, ready to run.
///
/// Restores the latest checkpoint on startup (if the storage has one),
/// resumes every partition's source from its stored cursor, and processes
/// partitions concurrently until end of input or shutdown.
pub struct SessionFlow<K, E, Src, C, A, St> {
  source: Src,
  clock: C,
  aggregator: A,
  config: EngineConfig,
  coordinator: CheckpointCoordinator<St>,
  _marker: PhantomData<fn(K, E)>,
}

impl<K, E, Src, C, A, St> SessionFlow<K, E, Src, C, A, St>
where
  K: Hash + Eq + Ord + Clone + Send + Serialize + DeserializeOwned + 'static,
  E: Send + 'static,
  Src: PartitionedSource<K, E>,
  Src::Handle: 'static,
  C: EventClock<E> + Clone + 'static,
  A: Aggregator<E> + Clone + 'static,
  A::Acc: Serialize + DeserializeOwned,
  St: CheckpointStorage + 'static,
{
  /// Creates a flow. Fails if the configuration is invalid.
  pub fn new(
    source: Src,
    clock: C,
    aggregator: A,
    config: EngineConfig,
    storage: Arc<St>,
  ) -> Result<Self, EngineError> {
    config.validate()?;
    let coordinator = CheckpointCoordinator::new(storage, config.snapshot_retry);
    Ok(Self {
      source,
      clock,
      aggregator,
      config,
      coordinator,
      _marker: PhantomData,
    })
  }

  /// Runs the flow until every partition reaches end of input or shutdown is
  /// signaled, then commits a final checkpoint.
  ///
  /// `make_sink` builds one sink per partition; sinks are never shared.
  pub async fn run<Snk, F>(
    mut self,
    make_sink: F,
    shutdown: watch::Receiver<bool>,
  ) -> Result<FlowSummary, EngineError>
  where
    Snk: OutputSink<K, E, A::Acc> + 'static,
    F: Fn(&PartitionId) -> Snk,
  {
    let mut restored: HashMap<PartitionId, PartitionSnapshot<K, A::Acc>> =
      match self.coordinator.load_latest()? {
        Some((metadata, snapshots)) => {
          tracing::info!(
            checkpoint = metadata.id.as_u64(),
            partitions = snapshots.len(),
            "resuming from checkpoint"
          );
          snapshots
            .into_iter()
            .map(|s| (s.partition.clone(), s))
            .collect()
        }
        None => HashMap::new(),
      };

    let partitions = self.source.list_partitions().await?;
    let cadence_events = match self.config.checkpoint {
      CheckpointCadence::EveryEvents(n) => Some(n),
      _ => None,
    };

    let (cadence_tx, mut cadence_rx) = mpsc::channel::<()>(partitions.len().max(1));
    let mut workers: JoinSet<Result<WorkerReport<K, A::Acc>, EngineError>> = JoinSet::new();
    let mut snap_channels: HashMap<PartitionId, mpsc::Sender<SnapshotRequest<K, A::Acc>>> =
      HashMap::new();

    for partition in &partitions {
      let engine = match restored.remove(partition) {
        Some(snapshot) => SessionEngine::restore(
          &self.config,
          self.clock.clone(),
          self.aggregator.clone(),
          snapshot,
        ),
        None => SessionEngine::new(
          partition.clone(),
          &self.config,
          self.clock.clone(),
          self.aggregator.clone(),
        ),
      };
      let resume = match engine.cursor() {
        Cursor::Earliest => None,
        cursor => Some(cursor.clone()),
      };
      let handle = self.source.open(partition, resume).await?;
      let sink = make_sink(partition);

      let (snap_tx, snap_rx) = mpsc::channel(1);
      snap_channels.insert(partition.clone(), snap_tx);
      workers.spawn(run_partition(
        engine,
        handle,
        sink,
        cadence_events,
        cadence_tx.clone(),
        snap_rx,
        shutdown.clone(),
      ));
    }
    drop(cadence_tx);

    for stale in restored.keys() {
      tracing::warn!(partition = %stale, "checkpointed partition no longer listed by source");
    }

    let periodic = matches!(self.config.checkpoint, CheckpointCadence::Every(_));
    let mut timer = tokio::time::interval(match self.config.checkpoint {
      CheckpointCadence::Every(interval) => interval,
      _ => Duration::from_secs(3600),
    });
    timer.tick().await; // the first tick completes immediately

    let mut summary = FlowSummary {
      partitions: partitions.len(),
      ..FlowSummary::default()
    };
    let mut finished: HashMap<PartitionId, PartitionSnapshot<K, A::Acc>> = HashMap::new();

    loop {
      tokio::select! {
        joined = workers.join_next() => match joined {
          None => break,
          Some(Ok(Ok(report))) => {
            summary.sessions_emitted += report.tallies.sessions_emitted;
            summary.late_events += report.tallies.late_events;
            summary.fold_failures += report.tallies.fold_failures;
            summary.clock_failures += report.tallies.clock_failures;
            let partition = report.snapshot.partition.clone();
            snap_channels.remove(&partition);
            finished.insert(partition, report.snapshot);
          }
          Some(Ok(Err(err))) => return Err(err),
          Some(Err(join_err)) => return Err(EngineError::Worker(join_err.to_string())),
        },
        Some(()) = cadence_rx.recv() => {
          self.checkpoint_barrier(&snap_channels, &finished).await?;
        }
        _ = timer.tick(), if periodic => {
          self.checkpoint_barrier(&snap_channels, &finished).await?;
        }
      }
    }

    let mut snapshots: Vec<PartitionSnapshot<K, A::Acc>> = finished.into_values().collect();
    snapshots.sort_by(|a, b| a.partition.cmp(&b.partition));
    if !snapshots.is_empty() {
      summary.final_checkpoint = Some(self.coordinator.commit(&snapshots).await?);
    }
    Ok(summary)
  }

  /// Collects a snapshot from every partition and commits them as one
  /// checkpoint. Skipped (with a warning) if a worker finished while the
  /// barrier was forming; the final checkpoint covers it.
  async fn checkpoint_barrier(
    &mut self,
    live: &HashMap<PartitionId, mpsc::Sender<SnapshotRequest<K, A::Acc>>>,
    finished: &HashMap<PartitionId, PartitionSnapshot<K, A::Acc>>,
  ) -> Result<(), EngineError> {
    let mut snapshots: Vec<PartitionSnapshot<K, A::Acc>> = finished.values().cloned().collect();
    for (partition, snap_tx) in live {
      let (reply_tx, reply_rx) = oneshot::channel();
      let request = SnapshotRequest { reply: reply_tx };
      if snap_tx.send(request).await.is_err() {
        tracing::warn!(partition = %partition, "partition ended mid-barrier; skipping checkpoint");
        return Ok(());
      }
      match reply_rx.await {
        Ok(snapshot) => snapshots.push(snapshot),
        Err(_) => {
          tracing::warn!(partition = %partition, "partition ended mid-barrier; skipping checkpoint");
          return Ok(());
        }
      }
    }
    snapshots.sort_by(|a, b| a.partition.cmp(&b.partition));
    self.coordinator.commit(&snapshots).await?;
    Ok(())
  }
}

async fn run_partition<K, E, H, C, A, Snk>(
  mut engine: SessionEngine<K, E, C, A>,
  mut handle: H,
  mut sink: Snk,
  cadence_events: Option<u64>,
  cadence_tx: mpsc::Sender<()>,
  mut snap_rx: mpsc::Receiver<SnapshotRequest<K, A::Acc>>,
  mut shutdown: watch::Receiver<bool>,
) -> Result<WorkerReport<K, A::Acc>, EngineError>
where
  K: Hash + Eq + Ord + Clone + Send,
  H: SourceHandle<K, E>,
  C: EventClock<E>,
  A: Aggregator<E>,
  Snk: OutputSink<K, E, A::Acc>,
{
  let mut tallies = Tallies::default();
  let mut events_since_checkpoint: u64 = 0;
  let mut shutdown_armed = true;
  let mut snapshots_armed = true;

  loop {
    tokio::select! {
      biased;

      request = snap_rx.recv(), if snapshots_armed => match request {
        // Quiescent point: no event is mid-step here.
        Some(request) => {
          let _ = request.reply.send(engine.snapshot());
          events_since_checkpoint = 0;
        }
        None => snapshots_armed = false,
      },

      changed = shutdown.changed(), if shutdown_armed => match changed {
        Ok(()) if *shutdown.borrow() => {
          tracing::debug!(partition = %engine.partition(), "shutdown requested");
          break;
        }
        Ok(()) => {}
        // Sender dropped without signaling: run to end of input.
        Err(_) => shutdown_armed = false,
      },

      record = handle.next() => match record? {
        Some((key, event)) => {
          let output = engine.step(key, event, handle.cursor());
          forward(&mut sink, output, &mut tallies).await?;
          if let Some(cadence) = cadence_events {
            events_since_checkpoint += 1;
            if events_since_checkpoint >= cadence {
              events_since_checkpoint = 0;
              let _ = cadence_tx.try_send(());
            }
          }
        }
        None => {
          for session in engine.finish() {
            tallies.sessions_emitted += 1;
            sink.emit(session).await?;
          }
          tracing::debug!(partition = %engine.partition(), "end of partition");
          break;
        }
      },
    }
  }

  Ok(WorkerReport {
    snapshot: engine.snapshot(),
    tallies,
  })
}

async fn forward<K, E, Acc, Snk>(
  sink: &mut Snk,
  output: StepOutput<K, E, Acc>,
  tallies: &mut Tallies,
) -> Result<(), EngineError>
where
  Snk: OutputSink<K, E, Acc>,
{
  for session in output.closed {
    tallies.sessions_emitted += 1;
    sink.emit(session).await?;
  }
  if let Some((key, event)) = output.late {
    tallies.late_events += 1;
    sink.emit_late(key, event).await?;
  }
  if output.fold_failure.is_some() {
    tallies.fold_failures += 1;
  }
  if output.clock_failure.is_some() {
    tallies.clock_failures += 1;
  }
  Ok(())
}
