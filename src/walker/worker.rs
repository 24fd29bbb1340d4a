//! Worker thread logic
//!
//! Each worker:
//! - Pulls tasks from the shared work queue
//! - Summarizes each data file it is handed
//! - Ships every result to the collector and waits for the acknowledgment
//! - On the termination marker, tells the collector it is done and exits
//!
//! The connection to the collector is opened on first use and kept for the
//! life of the worker.

use crate::error::{display_chain, TransportError, WorkerError};
use crate::protocol::{CollectorLink, Message};
use crate::stats::{analyze_file, ResultRecord};
use crate::walker::queue::{Task, WorkItem, WorkQueue};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace};

/// Statistics collected by a worker
#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Files summarized and acknowledged
    pub files_processed: AtomicU64,

    /// Numbers read across those files
    pub values_read: AtomicU64,
}

impl WorkerStats {
    fn record_file(&self, values: u64) {
        self.files_processed.fetch_add(1, Ordering::Relaxed);
        self.values_read.fetch_add(values, Ordering::Relaxed);
    }

    /// Files summarized so far
    pub fn files(&self) -> u64 {
        self.files_processed.load(Ordering::Relaxed)
    }

    /// Values read so far
    pub fn values(&self) -> u64 {
        self.values_read.load(Ordering::Relaxed)
    }
}

/// A worker thread draining the queue
pub struct Worker {
    /// Worker ID
    id: usize,

    /// Thread handle
    handle: Option<JoinHandle<Result<(), WorkerError>>>,

    /// Worker statistics
    stats: Arc<WorkerStats>,
}

impl Worker {
    /// Spawn a new worker thread
    pub fn spawn(
        id: usize,
        queue: WorkQueue<Task>,
        collector: SocketAddr,
    ) -> Result<Self, WorkerError> {
        let stats = Arc::new(WorkerStats::default());
        let stats_clone = Arc::clone(&stats);

        let handle = thread::Builder::new()
            .name(format!("worker-{}", id))
            .spawn(move || worker_loop(id, queue, collector, stats_clone))
            .map_err(|e| WorkerError::SpawnFailed {
                id,
                reason: e.to_string(),
            })?;

        Ok(Self {
            id,
            handle: Some(handle),
            stats,
        })
    }

    /// Get worker ID
    pub fn id(&self) -> usize {
        self.id
    }

    /// Get worker statistics
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Shared handle to the statistics, usable after the worker is joined
    pub fn shared_stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Whether the thread has exited
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the worker to finish
    pub fn join(mut self) -> Result<(), WorkerError> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .unwrap_or(Err(WorkerError::Panicked { id: self.id })),
            None => Ok(()),
        }
    }
}

/// Main worker loop
fn worker_loop(
    id: usize,
    queue: WorkQueue<Task>,
    collector: SocketAddr,
    stats: Arc<WorkerStats>,
) -> Result<(), WorkerError> {
    debug!(worker = id, "Worker starting");

    let result = drain(id, &queue, collector, &stats);
    match &result {
        Ok(()) => info!(worker = id, files = stats.files(), "Worker finished"),
        Err(e) => error!(worker = id, error = %display_chain(e), "Worker failed"),
    }
    result
}

fn drain(
    id: usize,
    queue: &WorkQueue<Task>,
    collector: SocketAddr,
    stats: &WorkerStats,
) -> Result<(), WorkerError> {
    let mut link: Option<CollectorLink> = None;
    let transport = |source| WorkerError::Transport { id, source };

    loop {
        match queue.pop() {
            Task::Terminate => {
                let conn = connect_once(&mut link, collector).map_err(transport)?;
                conn.deliver(&Message::Ended).map_err(transport)?;
                debug!(worker = id, "Termination acknowledged");
                // Dropping the link closes the connection
                return Ok(());
            }
            Task::File(item) => {
                let record = process_file(id, &item)?;
                let values = record.count;
                let conn = connect_once(&mut link, collector).map_err(transport)?;
                conn.deliver(&Message::Record(record)).map_err(transport)?;
                stats.record_file(values);
            }
        }
    }
}

fn process_file(id: usize, item: &WorkItem) -> Result<ResultRecord, WorkerError> {
    let record = analyze_file(item.path())
        .map_err(|source| WorkerError::Analysis { id, source })?;
    trace!(
        worker = id,
        path = %record.path,
        count = record.count,
        "File summarized"
    );
    Ok(record)
}

/// Open the collector connection the first time it is needed
fn connect_once(
    link: &mut Option<CollectorLink>,
    collector: SocketAddr,
) -> Result<&mut CollectorLink, TransportError> {
    let conn = match link.take() {
        Some(conn) => conn,
        None => {
            trace!(%collector, "Connecting to collector");
            CollectorLink::connect(collector)?
        }
    };
    Ok(link.insert(conn))
}

/// Aggregate statistics from multiple workers: (files, values)
pub fn aggregate_stats(workers: &[Worker]) -> (u64, u64) {
    workers.iter().fold((0, 0), |(files, values), worker| {
        (files + worker.stats.files(), values + worker.stats.values())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::Collector;
    use crate::error::AnalysisError;
    use crate::handshake::{channel_readiness, send_worker_count, ReadyWaiter};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_worker_stats() {
        let stats = WorkerStats::default();
        stats.record_file(10);
        stats.record_file(5);
        assert_eq!(stats.files(), 2);
        assert_eq!(stats.values(), 15);
    }

    #[test]
    fn test_worker_ships_results_then_terminates() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.dat"), "1 2 3").unwrap();
        fs::write(dir.path().join("b.dat"), "5 5").unwrap();

        let (notifier, waiter) = channel_readiness();
        let collector = thread::spawn(move || {
            let mut out = Vec::new();
            Collector::bind("127.0.0.1:0".parse().unwrap())?
                .serve(notifier, &mut out)
                .map(|summary| (summary, out))
        });
        let addr = waiter.wait().unwrap();
        send_worker_count(addr, 1).unwrap();

        let queue = WorkQueue::new();
        queue.push_file(WorkItem::new(dir.path().join("a.dat")));
        queue.push_file(WorkItem::new(dir.path().join("b.dat")));
        queue.push_terminators(1);

        let worker = Worker::spawn(0, queue.clone(), addr).unwrap();
        let stats = worker.shared_stats();
        worker.join().unwrap();

        assert_eq!(stats.files(), 2);
        assert_eq!(stats.values(), 5);
        assert!(queue.is_empty());

        let (summary, out) = collector.join().unwrap().unwrap();
        assert_eq!(summary.records, 2);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("3\t2.00\t0.82\t"));
        assert!(text.contains("2\t5.00\t0.00\t"));
    }

    #[test]
    fn test_malformed_file_fails_worker_before_connecting() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.dat");
        fs::write(&path, "1 two 3").unwrap();

        // Nothing listens here; the worker must fail on the file first
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let queue = WorkQueue::new();
        queue.push_file(WorkItem::new(&path));
        queue.push_terminators(1);

        let err = Worker::spawn(4, queue, addr).unwrap().join().unwrap_err();
        assert!(matches!(
            err,
            WorkerError::Analysis {
                id: 4,
                source: AnalysisError::Malformed { .. }
            }
        ));
    }

    #[test]
    fn test_unreachable_collector_fails_worker() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let queue = WorkQueue::new();
        queue.push_terminators(1);

        let err = Worker::spawn(1, queue, addr).unwrap().join().unwrap_err();
        assert!(matches!(
            err,
            WorkerError::Transport {
                id: 1,
                source: TransportError::Connect { .. }
            }
        ));
    }
}
