//! Unbounded work queue shared by the coordinator and the worker pool
//!
//! A FIFO guarded by a mutex, with a condition variable that wakes one
//! blocked consumer per push. Producers never block; consumers block
//! until an item is available. Termination markers travel through the
//! same queue as ordinary work so that FIFO order alone guarantees no
//! worker stops while files remain unclaimed.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One data file waiting to be summarized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Path of the file, as discovered under the root
    pub path: PathBuf,
}

impl WorkItem {
    /// Create a work item for a file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// An entry in the worker queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Summarize this file
    File(WorkItem),

    /// No more work: report termination and exit
    Terminate,
}

impl Task {
    /// Returns true for the termination marker
    pub fn is_terminate(&self) -> bool {
        matches!(self, Task::Terminate)
    }
}

/// Statistics for the work queue
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Total items pushed
    pub enqueued: AtomicU64,

    /// Total items popped
    pub dequeued: AtomicU64,
}

impl QueueStats {
    /// Items pushed so far
    pub fn pushed(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Items popped so far
    pub fn popped(&self) -> u64 {
        self.dequeued.load(Ordering::Relaxed)
    }
}

struct Shared<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
    stats: QueueStats,
}

/// Unbounded multi-producer, multi-consumer FIFO
///
/// Cloning yields another handle to the same queue.
pub struct WorkQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                items: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
                stats: QueueStats::default(),
            }),
        }
    }

    /// Append an item and wake one waiting consumer
    pub fn push(&self, item: T) {
        let mut items = self.shared.items.lock();
        items.push_back(item);
        self.shared.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        drop(items);
        self.shared.available.notify_one();
    }

    /// Remove the oldest item, blocking while the queue is empty
    pub fn pop(&self) -> T {
        let mut items = self.shared.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                self.shared.stats.dequeued.fetch_add(1, Ordering::Relaxed);
                return item;
            }
            self.shared.available.wait(&mut items);
        }
    }

    /// Remove the oldest item if there is one
    pub fn try_pop(&self) -> Option<T> {
        let item = self.shared.items.lock().pop_front();
        if item.is_some() {
            self.shared.stats.dequeued.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    /// Current number of queued items
    pub fn len(&self) -> usize {
        self.shared.items.lock().len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.shared.items.lock().is_empty()
    }

    /// Queue statistics
    pub fn stats(&self) -> &QueueStats {
        &self.shared.stats
    }
}

impl WorkQueue<Task> {
    /// Queue a file for analysis
    pub fn push_file(&self, item: WorkItem) {
        self.push(Task::File(item));
    }

    /// Queue one termination marker per worker
    pub fn push_terminators(&self, workers: usize) {
        for _ in 0..workers {
            self.push(Task::Terminate);
        }
    }
}
