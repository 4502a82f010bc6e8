//! # SessionWeave
//!
//! Event-time session windowing and aggregation over partitioned, resumable
//! inputs.
//!
//! SessionWeave groups a per-key stream of timestamped events into
//! gap-based session windows, folds each window into a caller-supplied
//! accumulator, and emits one result per closed window — tolerating
//! out-of-order arrival via watermarks and surviving restarts via
//! checkpoints.
//!
//! ## Key Features
//!
//! - **Event-time sessions**: windows bounded by inactivity gaps, closed by
//!   watermarks, never by wall-clock timers
//! - **Pluggable seams**: partitioned input sources, caller-supplied folds,
//!   and output sinks are traits, not baked in
//! - **Resumable**: session tables, watermarks, and input cursors are
//!   checkpointed as one unit; replay after restore reproduces the same
//!   results as an uninterrupted run
//! - **Late-data channel**: events behind the watermark are routed to a
//!   side channel instead of silently dropped or reopening closed sessions
//!
//! ## Quick Start
//!
//! Build a [`runtime::SessionFlow`] from a source, a clock, an aggregator,
//! and checkpoint storage, then `run` it with a sink per partition. See the
//! [`runtime`] module for a complete example.

// Documentation enforcement - treat missing docs as errors
#![deny(missing_docs)]

/// Checkpointing: snapshots, storage backends, and coordination.
pub mod checkpoint;
/// Engine configuration: gap, lateness allowance, checkpoint cadence.
pub mod config;
/// The session windowing engine for one partition.
pub mod engine;
/// Top-level error taxonomy.
pub mod error;
/// Caller-supplied aggregation folds.
pub mod fold;
/// Partitioned flow runtime: workers, barriers, shutdown.
pub mod runtime;
/// Per-key session state and the session table.
pub mod session;
/// Output sinks for closed sessions and late data.
pub mod sink;
/// Partitioned, resumable input sources.
pub mod source;
/// Event-time primitives and clock extraction.
pub mod time;
/// Per-partition watermark tracking.
pub mod watermark;
