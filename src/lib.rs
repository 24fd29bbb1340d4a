//! datstat - Distributed statistics over numeric data files
//!
//! Walks a directory tree for data files, summarizes each one (count, mean,
//! population standard deviation) on a fixed pool of worker threads, and
//! funnels every result through a single collector that prints one line
//! per file.
//!
//! # Features
//!
//! - **Worker Pool**: W threads drain an unbounded Mutex + Condvar queue;
//!   one termination marker per worker is queued after traversal ends.
//!
//! - **Streaming Summaries**: files are tokenized through a buffered
//!   reader and never held in memory.
//!
//! - **Multiplexing Collector**: a single thread services every worker
//!   connection with `poll(2)`, acknowledging each frame.
//!
//! - **Deterministic Shutdown**: the collector stops after exactly W
//!   termination frames, whatever order they arrive in.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐   SIGUSR1 / channel   ┌──────────────────────┐
//! │         Coordinator          │ ◄──────────────────── │      Collector       │
//! │  walkdir ─► WorkQueue        │                       │  (child or thread)   │
//! │              │               │ ── W (4 bytes BE) ──► │                      │
//! │   ┌──────────┼──────────┐    │                       │  poll(2) over        │
//! │   ▼          ▼          ▼    │                       │  listener + peers    │
//! │ Worker 0  Worker 1 … Worker W-1 ── 'R' frames ─────► │                      │
//! │                              │ ◄──────── "Ok" ────── │  stdout: n avg std   │
//! │                              │ ── 'E' "Ended" ─────► │  file                │
//! └──────────────────────────────┘                       └──────────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Four workers, collector in a child process on 127.0.0.1:19052
//! datstat ./data 4
//!
//! # Collector on a thread, any free port, with a progress spinner
//! datstat ./data 8 --mode thread --port 0 -p
//! ```

pub mod collector;
pub mod config;
pub mod error;
pub mod handshake;
pub mod launcher;
pub mod progress;
pub mod protocol;
pub mod stats;
pub mod walker;

pub use collector::{Collector, CollectorSummary};
pub use config::{CliArgs, LaunchMode, RunConfig};
pub use error::{Result, StatError};
pub use launcher::{run, run_threaded, RunReport};
pub use stats::{analyze_file, ResultRecord, Summary};
pub use walker::{Coordinator, CoordinatorReport};
