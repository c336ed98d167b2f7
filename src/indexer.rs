//! Global search indexing service.
//!
//! A fixed-size worker pool drains corpus-substring indexing jobs off the
//! critical path of `CorpusChunk::insert`; a [`CountUpLatch`] lets the
//! inserting thread block until every job it enqueued has completed,
//! without needing a result per job to flow back synchronously. Built on
//! plain `std::thread` plus a bounded channel rather than an external
//! thread-pool crate.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, unbounded};

/// A barrier that threads can repeatedly increment and others can wait on
/// until it reaches a target count.
#[derive(Debug, Default)]
pub struct CountUpLatch {
    count: Mutex<u64>,
    cv: Condvar,
}

impl CountUpLatch {
    pub fn new() -> Self {
        Self {
            count: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    /// Increment the count and wake any waiters.
    pub fn count_up(&self) {
        let mut guard = self.count.lock().unwrap();
        *guard += 1;
        self.cv.notify_all();
    }

    /// Block until the count reaches `expected`. Returns immediately if
    /// `expected` is already met (including `expected == 0`).
    pub fn await_count(&self, expected: u64) {
        let mut guard = self.count.lock().unwrap();
        while *guard < expected {
            guard = self.cv.wait(guard).unwrap();
        }
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Process-global worker pool for corpus indexing jobs.
pub struct SearchIndexer {
    sender: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl SearchIndexer {
    /// Spawn a pool of `num_threads.max(3)` workers.
    pub fn new(num_threads: usize) -> Self {
        let n = num_threads.max(3);
        let (sender, receiver) = unbounded::<Job>();
        let workers = (0..n)
            .map(|_| {
                let receiver = receiver.clone();
                thread::spawn(move || {
                    for job in receiver.iter() {
                        job();
                    }
                })
            })
            .collect();
        Self { sender, workers }
    }

    /// `max(3, ceil(0.5 * cores))`, the default `indexer_threads` count.
    pub fn default_thread_count() -> usize {
        let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        ((cores as f64 * 0.5).ceil() as usize).max(3)
    }

    /// Enqueue a job. Never blocks the caller.
    pub fn submit(&self, job: Job) {
        // An unbounded channel send only fails if every receiver dropped,
        // which only happens after `shutdown` — a caller racing shutdown
        // loses its job, which is acceptable for a process-global service
        // being torn down.
        let _ = self.sender.send(job);
    }

    /// Stop accepting jobs and join all workers, draining whatever is
    /// already queued.
    pub fn shutdown(self) {
        drop(self.sender);
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for SearchIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchIndexer")
            .field("workers", &self.workers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn latch_await_returns_once_count_reached() {
        let latch = Arc::new(CountUpLatch::new());
        let l2 = latch.clone();
        let handle = thread::spawn(move || {
            for _ in 0..5 {
                l2.count_up();
            }
        });
        latch.await_count(5);
        handle.join().unwrap();
    }

    #[test]
    fn await_zero_returns_immediately() {
        let latch = CountUpLatch::new();
        latch.await_count(0);
    }

    #[test]
    fn indexer_runs_submitted_jobs() {
        let indexer = SearchIndexer::new(3);
        let counter = Arc::new(AtomicU64::new(0));
        let latch = Arc::new(CountUpLatch::new());
        for _ in 0..50 {
            let counter = counter.clone();
            let latch = latch.clone();
            indexer.submit(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                latch.count_up();
            }));
        }
        latch.await_count(50);
        assert_eq!(counter.load(Ordering::SeqCst), 50);
        indexer.shutdown();
    }

    #[test]
    fn default_thread_count_is_at_least_three() {
        assert!(SearchIndexer::default_thread_count() >= 3);
    }
}
