//! Run coordinator - orchestrates discovery and the worker pool
//!
//! The coordinator is responsible for:
//! - Waiting for the collector to come up and handing it the worker count
//! - Setting up the work queue and spawning the workers
//! - Feeding discovered files to the queue, then one marker per worker
//! - Progress reporting
//! - Joining the workers and reporting the first failure

use crate::config::RunConfig;
use crate::error::{display_chain, Result, StatError, WorkerError};
use crate::handshake::{send_worker_count, ReadyWaiter};
use crate::progress::ProgressReporter;
use crate::walker::discovery::discover;
use crate::walker::queue::{Task, WorkQueue};
use crate::walker::worker::{aggregate_stats, Worker};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Refresh the progress display after this many queued files
const PROGRESS_INTERVAL: u64 = 64;

/// How often the spinner is refreshed while workers drain the queue
const CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Result of a completed coordinator run
#[derive(Debug, Clone, Default)]
pub struct CoordinatorReport {
    /// Files discovered and queued
    pub files_queued: u64,

    /// Workers spawned and joined
    pub workers: usize,

    /// Files summarized and acknowledged by the collector
    pub files_processed: u64,

    /// Numbers read across all files
    pub values_read: u64,

    /// Time from readiness to the last join
    pub duration: Duration,
}

/// Coordinates discovery and the worker pool
pub struct Coordinator {
    /// Configuration
    config: Arc<RunConfig>,

    /// Shared queue of files and termination markers
    queue: WorkQueue<Task>,

    /// Worker threads
    workers: Vec<Worker>,

    /// Optional spinner
    progress: Option<ProgressReporter>,
}

impl Coordinator {
    /// Create a new coordinator
    pub fn new(config: Arc<RunConfig>) -> Self {
        Self {
            config,
            queue: WorkQueue::new(),
            workers: Vec::new(),
            progress: None,
        }
    }

    /// Report progress on a spinner while running
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run the coordinator side of a run
    ///
    /// Blocks on `waiter` until the collector is listening, so nothing is
    /// sent before the endpoint exists.
    pub fn run<R: ReadyWaiter>(mut self, waiter: R) -> Result<CoordinatorReport> {
        self.set_status("Waiting for collector...");
        let collector = waiter.wait()?;
        let start_time = Instant::now();

        let worker_count = self.config.worker_count;
        send_worker_count(collector, worker_count as u32)?;

        info!(
            root = %self.config.root.display(),
            workers = worker_count,
            %collector,
            "Starting run"
        );

        self.spawn_workers(collector)?;

        let files_queued = match self.feed(start_time) {
            Ok(files) => files,
            Err(e) => {
                self.release_workers();
                self.finish_progress("Traversal failed");
                return Err(e);
            }
        };
        self.queue.push_terminators(worker_count);
        debug!(files = files_queued, workers = worker_count, "Termination markers queued");

        let (files_processed, values_read) = self.join_workers(start_time, files_queued)?;
        let duration = start_time.elapsed();

        self.finish_progress("Run completed");
        info!(
            files = files_processed,
            values = values_read,
            duration_ms = duration.as_millis() as u64,
            "Workers finished"
        );

        Ok(CoordinatorReport {
            files_queued,
            workers: worker_count,
            files_processed,
            values_read,
            duration,
        })
    }

    /// Spawn worker threads
    fn spawn_workers(&mut self, collector: SocketAddr) -> Result<()> {
        for id in 0..self.config.worker_count {
            let worker = Worker::spawn(id, self.queue.clone(), collector)?;
            self.workers.push(worker);
        }

        info!(count = self.workers.len(), "Workers spawned");
        Ok(())
    }

    /// Discover eligible files and queue one task per file
    fn feed(&self, start_time: Instant) -> Result<u64> {
        let filter = self.config.filter();
        let queue = &self.queue;

        let files = discover(&self.config.root, &filter, |item| {
            queue.push_file(item);
            let queued = queue.stats().pushed();
            if queued % PROGRESS_INTERVAL == 0 {
                self.report(start_time, queued);
            }
        })?;

        self.report(start_time, files);
        info!(files, "Traversal complete");
        Ok(files)
    }

    /// Keep the spinner current until every worker has exited
    fn wait_for_workers(&self, start_time: Instant, files_queued: u64) {
        if self.progress.is_none() {
            return;
        }
        loop {
            self.report(start_time, files_queued);
            if self.workers.iter().all(Worker::is_finished) {
                return;
            }
            thread::sleep(CHECK_INTERVAL);
        }
    }

    /// Join all worker threads and collect final stats
    ///
    /// Every worker is joined even after one fails; the first failure wins.
    fn join_workers(&mut self, start_time: Instant, files_queued: u64) -> Result<(u64, u64)> {
        self.wait_for_workers(start_time, files_queued);

        let mut first_error: Option<WorkerError> = None;
        let (mut files, mut values) = (0, 0);

        let workers = std::mem::take(&mut self.workers);
        for worker in workers {
            let id = worker.id();
            let stats = worker.shared_stats();
            if let Err(e) = worker.join() {
                warn!(worker = id, error = %display_chain(&e), "Worker failed");
                first_error.get_or_insert(e);
            }
            // Counters are final once the thread has joined
            files += stats.files();
            values += stats.values();
        }

        if let Some(e) = first_error {
            self.finish_progress("Run failed");
            return Err(StatError::Worker(e));
        }
        Ok((files, values))
    }

    /// Stop the pool after a failed traversal
    ///
    /// Files still queued are dropped and every worker gets its marker, so
    /// each one sends its termination frame and exits before we return.
    fn release_workers(&mut self) {
        let dropped = std::iter::from_fn(|| self.queue.try_pop()).count();
        self.queue.push_terminators(self.workers.len());
        debug!(dropped, workers = self.workers.len(), "Releasing workers");

        for worker in std::mem::take(&mut self.workers) {
            let id = worker.id();
            if let Err(e) = worker.join() {
                warn!(worker = id, error = %display_chain(&e), "Worker failed while shutting down");
            }
        }
    }

    fn report(&self, start_time: Instant, files_queued: u64) {
        if let Some(progress) = &self.progress {
            let (files_done, _) = aggregate_stats(&self.workers);
            progress.update(&RunProgress {
                files_queued,
                files_done,
                queue_size: self.queue.len(),
                total_workers: self.config.worker_count,
                elapsed: start_time.elapsed(),
            });
        }
    }

    fn set_status(&self, status: &str) {
        if let Some(progress) = &self.progress {
            progress.set_status(status);
        }
    }

    fn finish_progress(&self, message: &str) {
        if let Some(progress) = &self.progress {
            progress.finish(message);
        }
    }
}

/// Progress information for display
#[derive(Debug, Clone)]
pub struct RunProgress {
    /// Files pushed onto the queue
    pub files_queued: u64,

    /// Files acknowledged by the collector
    pub files_done: u64,

    /// Current queue size
    pub queue_size: usize,

    /// Total workers
    pub total_workers: usize,

    /// Elapsed time
    pub elapsed: Duration,
}

impl RunProgress {
    /// Calculate files per second rate
    pub fn files_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.files_done as f64 / secs
        } else {
            0.0
        }
    }
}
