//! Coordinator side of a run: discovery, the work queue and the worker pool
//!
//! # Architecture
//!
//! ```text
//!                     ┌─────────────────────────┐
//!                     │      Coordinator        │
//!                     │  - walkdir discovery    │
//!                     │  - W markers at the end │
//!                     └───────────┬─────────────┘
//!                                 │ push
//!                     ┌───────────▼─────────────┐
//!                     │       WorkQueue         │
//!                     │  (Mutex + Condvar FIFO) │
//!                     └───────────┬─────────────┘
//!                                 │ pop
//!       ┌─────────────────────────┼─────────────────────────┐
//!       │                         │                         │
//! ┌─────▼─────┐             ┌─────▼─────┐             ┌─────▼─────┐
//! │  Worker 0 │             │  Worker 1 │             │ Worker W-1│
//! │ summarize │             │ summarize │             │ summarize │
//! └─────┬─────┘             └─────┬─────┘             └─────┬─────┘
//!       └──────────── one TCP connection each ──────────────┘
//!                                 ▼
//!                             Collector
//! ```

pub mod coordinator;
pub mod discovery;
pub mod queue;
pub mod worker;

pub use coordinator::{Coordinator, CoordinatorReport, RunProgress};
pub use discovery::{discover, FileFilter};
pub use queue::{QueueStats, Task, WorkItem, WorkQueue};
pub use worker::{Worker, WorkerStats};
