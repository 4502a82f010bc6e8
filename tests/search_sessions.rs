//! End-to-end flow tests: search sessions with click-through rates.
//!
//! Drives the public API the way an analytics pipeline would: a stream of
//! per-user search activity is grouped into gap-based sessions and each
//! closed session is folded into search/click counts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sessionweave::checkpoint::{CheckpointStorage, InMemoryCheckpointStorage};
use sessionweave::config::{CheckpointCadence, EngineConfig};
use sessionweave::fold::{Aggregator, FoldError};
use sessionweave::runtime::{SessionFlow, shutdown_channel};
use sessionweave::session::ClosedSession;
use sessionweave::sink::{OutputSink, SinkError};
use sessionweave::source::{
  Cursor, PartitionId, PartitionedSource, SourceError, SourceHandle, VecSource,
};
use sessionweave::time::{HasEventTime, PayloadClock};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One user action in a search flow.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SearchEvent {
  AppOpen { time_ms: u64 },
  Search { time_ms: u64, query: String },
  Results { time_ms: u64, items: Vec<String> },
  Click { time_ms: u64, item: String },
}

impl HasEventTime for SearchEvent {
  fn event_time_ms(&self) -> Option<u64> {
    match self {
      SearchEvent::AppOpen { time_ms }
      | SearchEvent::Search { time_ms, .. }
      | SearchEvent::Results { time_ms, .. }
      | SearchEvent::Click { time_ms, .. } => Some(*time_ms),
    }
  }
}

fn search(time_ms: u64, query: &str) -> SearchEvent {
  SearchEvent::Search {
    time_ms,
    query: query.to_string(),
  }
}

fn results(time_ms: u64, items: &[&str]) -> SearchEvent {
  SearchEvent::Results {
    time_ms,
    items: items.iter().map(|s| s.to_string()).collect(),
  }
}

fn click(time_ms: u64, item: &str) -> SearchEvent {
  SearchEvent::Click {
    time_ms,
    item: item.to_string(),
  }
}

/// Per-session search statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
struct SearchStats {
  searches: u32,
  clicks: u32,
  events: u32,
}

impl SearchStats {
  /// Click-through rate: clicks per search. Not capped at 1.0 — a session
  /// with more clicks than searches reports a rate above one. Zero searches
  /// reports 0 rather than dividing by zero.
  fn ctr(&self) -> f64 {
    if self.searches == 0 {
      0.0
    } else {
      f64::from(self.clicks) / f64::from(self.searches)
    }
  }
}

#[derive(Debug, Clone, Copy, Default)]
struct CtrAggregator;

impl Aggregator<SearchEvent> for CtrAggregator {
  type Acc = SearchStats;

  fn identity(&self) -> SearchStats {
    SearchStats::default()
  }

  fn fold(&self, mut acc: SearchStats, event: &SearchEvent) -> Result<SearchStats, FoldError> {
    acc.events += 1;
    match event {
      SearchEvent::Search { .. } => acc.searches += 1,
      SearchEvent::Click { .. } => acc.clicks += 1,
      SearchEvent::AppOpen { .. } | SearchEvent::Results { .. } => {}
    }
    Ok(acc)
  }
}

/// Sink that shares its collected output with the test body.
#[derive(Clone, Default)]
struct CollectingSink {
  sessions: Arc<Mutex<Vec<ClosedSession<String, SearchStats>>>>,
  late: Arc<Mutex<Vec<(String, SearchEvent)>>>,
}

#[async_trait]
impl OutputSink<String, SearchEvent, SearchStats> for CollectingSink {
  async fn emit(&mut self, session: ClosedSession<String, SearchStats>) -> Result<(), SinkError> {
    self.sessions.lock().unwrap().push(session);
    Ok(())
  }

  async fn emit_late(&mut self, key: String, event: SearchEvent) -> Result<(), SinkError> {
    self.late.lock().unwrap().push((key, event));
    Ok(())
  }
}

/// The reference scenario: two users searching concurrently, gap 5 s.
fn reference_records() -> Vec<(String, SearchEvent)> {
  vec![
    ("1".to_string(), search(5_000, "dogs")),
    ("1".to_string(), results(6_000, &["fido", "rover", "buddy"])),
    ("1".to_string(), click(7_000, "rover")),
    ("2".to_string(), search(5_000, "cats")),
    ("2".to_string(), results(6_000, &["fluffy", "burrito", "kathy"])),
    ("2".to_string(), click(7_000, "fluffy")),
    ("2".to_string(), click(8_000, "kathy")),
  ]
}

fn config() -> EngineConfig {
  EngineConfig::new(Duration::from_secs(5))
}

async fn run_flow(
  records: Vec<(String, SearchEvent)>,
  config: EngineConfig,
  storage: Arc<InMemoryCheckpointStorage>,
) -> (CollectingSink, sessionweave::runtime::FlowSummary) {
  let sink = CollectingSink::default();
  let flow = SessionFlow::new(
    VecSource::new(records),
    PayloadClock,
    CtrAggregator,
    config,
    storage,
  )
  .unwrap();
  let (_shutdown_tx, shutdown_rx) = shutdown_channel();
  let make_sink = {
    let sink = sink.clone();
    move |_: &PartitionId| sink.clone()
  };
  let summary = flow.run(make_sink, shutdown_rx).await.unwrap();
  (sink, summary)
}

#[tokio::test]
async fn click_through_rate_per_session_matches_reference_behavior() {
  let _ = tracing_subscriber::fmt().with_test_writer().try_init();

  let (sink, summary) = run_flow(
    reference_records(),
    config(),
    Arc::new(InMemoryCheckpointStorage::new()),
  )
  .await;

  let sessions = sink.sessions.lock().unwrap();
  assert_eq!(sessions.len(), 2);
  assert_eq!(summary.sessions_emitted, 2);
  assert_eq!(summary.late_events, 0);

  let user1 = sessions.iter().find(|s| s.key == "1").unwrap();
  assert_eq!(user1.accumulator.events, 3);
  assert_eq!(user1.accumulator.ctr(), 1.0);

  // Two clicks against one search: the rate is 2.0, deliberately not capped.
  let user2 = sessions.iter().find(|s| s.key == "2").unwrap();
  assert_eq!(user2.accumulator.events, 4);
  assert_eq!(user2.accumulator.ctr(), 2.0);
}

#[tokio::test]
async fn zero_searches_reports_zero_rate() {
  let records = vec![
    ("3".to_string(), SearchEvent::AppOpen { time_ms: 1_000 }),
    ("3".to_string(), click(2_000, "ad-banner")),
  ];
  let (sink, _) = run_flow(records, config(), Arc::new(InMemoryCheckpointStorage::new())).await;

  let sessions = sink.sessions.lock().unwrap();
  assert_eq!(sessions.len(), 1);
  assert_eq!(sessions[0].accumulator.searches, 0);
  assert_eq!(sessions[0].accumulator.ctr(), 0.0);
}

#[tokio::test]
async fn gap_splits_one_user_into_multiple_sessions() {
  let records = vec![
    ("1".to_string(), search(5_000, "dogs")),
    ("1".to_string(), click(7_000, "rover")),
    // 13 seconds of inactivity: new session.
    ("1".to_string(), search(20_000, "cats")),
  ];
  let (sink, _) = run_flow(records, config(), Arc::new(InMemoryCheckpointStorage::new())).await;

  let sessions = sink.sessions.lock().unwrap();
  assert_eq!(sessions.len(), 2);
  assert_eq!(sessions[0].accumulator.events, 2);
  assert_eq!(sessions[1].accumulator.events, 1);
}

#[tokio::test]
async fn late_event_lands_on_the_side_channel() {
  let records = vec![
    ("1".to_string(), search(5_000, "dogs")),
    ("2".to_string(), search(30_000, "cats")),
    // Would have belonged to user 1's long-closed session.
    ("1".to_string(), click(6_000, "rover")),
  ];
  let (sink, summary) = run_flow(records, config(), Arc::new(InMemoryCheckpointStorage::new())).await;

  assert_eq!(summary.late_events, 1);
  let late = sink.late.lock().unwrap();
  assert_eq!(late.len(), 1);
  assert_eq!(late[0].0, "1");
  assert_eq!(late[0].1, click(6_000, "rover"));

  // The closed session was not reopened or extended.
  let sessions = sink.sessions.lock().unwrap();
  let user1 = sessions.iter().find(|s| s.key == "1").unwrap();
  assert_eq!(user1.accumulator.events, 1);
}

/// Source that delivers the first `gate` records, then suspends forever —
/// standing in for an upstream that has not produced more data yet.
#[derive(Clone)]
struct GatedSource {
  records: Arc<Vec<(String, SearchEvent)>>,
  gate: usize,
}

struct GatedHandle {
  records: Arc<Vec<(String, SearchEvent)>>,
  gate: usize,
  next_index: usize,
}

#[async_trait]
impl PartitionedSource<String, SearchEvent> for GatedSource {
  type Handle = GatedHandle;

  async fn list_partitions(&self) -> Result<Vec<PartitionId>, SourceError> {
    Ok(vec![PartitionId::new("partition-0")])
  }

  async fn open(
    &self,
    _partition: &PartitionId,
    resume: Option<Cursor>,
  ) -> Result<Self::Handle, SourceError> {
    let next_index = match resume.unwrap_or_default() {
      Cursor::Earliest => 0,
      Cursor::Sequence(n) => n as usize,
      Cursor::Custom(c) => return Err(SourceError::new(format!("unsupported cursor: {}", c))),
    };
    Ok(GatedHandle {
      records: Arc::clone(&self.records),
      gate: self.gate,
      next_index,
    })
  }
}

#[async_trait]
impl SourceHandle<String, SearchEvent> for GatedHandle {
  async fn next(&mut self) -> Result<Option<(String, SearchEvent)>, SourceError> {
    if self.next_index >= self.gate {
      std::future::pending::<()>().await;
    }
    let record = self.records[self.next_index].clone();
    self.next_index += 1;
    Ok(Some(record))
  }

  fn cursor(&self) -> Cursor {
    Cursor::Sequence(self.next_index as u64)
  }
}

#[tokio::test]
async fn resuming_from_a_checkpoint_reproduces_the_uninterrupted_run() {
  let records = reference_records();

  // Baseline: one uninterrupted run.
  let (baseline_sink, _) = run_flow(
    records.clone(),
    config(),
    Arc::new(InMemoryCheckpointStorage::new()),
  )
  .await;
  let baseline: Vec<ClosedSession<String, SearchStats>> =
    baseline_sink.sessions.lock().unwrap().clone();

  // Interrupted run: the source stalls after four records; a checkpoint is
  // taken on cadence, then the flow is shut down mid-stream.
  let storage = Arc::new(InMemoryCheckpointStorage::new());
  let first_sink = CollectingSink::default();
  let flow = SessionFlow::new(
    GatedSource {
      records: Arc::new(records.clone()),
      gate: 4,
    },
    PayloadClock,
    CtrAggregator,
    config().with_checkpoint(CheckpointCadence::EveryEvents(4)),
    Arc::clone(&storage),
  )
  .unwrap();
  let (shutdown_tx, shutdown_rx) = shutdown_channel();
  let make_sink = {
    let sink = first_sink.clone();
    move |_: &PartitionId| sink.clone()
  };
  let running = tokio::spawn(flow.run(make_sink, shutdown_rx));

  // Wait until the cadence checkpoint lands, then stop the flow.
  let mut waited = 0;
  while storage.latest().unwrap().is_none() {
    tokio::time::sleep(Duration::from_millis(10)).await;
    waited += 1;
    assert!(waited < 500, "no checkpoint appeared");
  }
  shutdown_tx.send(true).unwrap();
  let summary = running.await.unwrap().unwrap();

  // Nothing closed before the interruption; both sessions were still open.
  assert_eq!(summary.sessions_emitted, 0);
  assert!(first_sink.sessions.lock().unwrap().is_empty());

  // Second run restores the checkpoint and replays only the remainder.
  let (second_sink, second_summary) = run_flow(records, config(), storage).await;
  assert_eq!(second_summary.sessions_emitted, 2);

  let resumed: Vec<ClosedSession<String, SearchStats>> =
    second_sink.sessions.lock().unwrap().clone();
  assert_eq!(resumed, baseline);
}
