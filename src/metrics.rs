//! Performance metrics for the storage kernel.
//!
//! Provides lightweight, thread-safe metrics collection with zero-cost
//! when unused: per-operation counters plus a bounded rolling latency
//! window for percentiles, covering this crate's operations — `acquire`,
//! `sync`, `seek`, `corpus_insert`, `transfer`.
//!
//! # Design
//!
//! - Thread-safe: counters are `AtomicU64`; the latency window is a
//!   `Mutex<VecDeque<u64>>`.
//! - Bounded memory: the latency window and slow-operation log are
//!   fixed-size ring buffers.
//! - `record_*` calls are O(1) amortized; `snapshot()` sorts the
//!   latency window and is meant for occasional (not per-call) use.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Rolling window size for percentile calculation.
const LATENCY_WINDOW_SIZE: usize = 1000;

/// Number of recent slow operations retained for reporting.
const MAX_SLOW_OPERATIONS: usize = 10;

/// Operations slower than this are logged as slow (microseconds).
pub const SLOW_OPERATION_THRESHOLD_US: u64 = 50_000;

/// The kernel operations metrics are broken down by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Acquire,
    Sync,
    Seek,
    CorpusInsert,
    Transfer,
    Other,
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Operation::Acquire => "acquire",
            Operation::Sync => "sync",
            Operation::Seek => "seek",
            Operation::CorpusInsert => "corpus_insert",
            Operation::Transfer => "transfer",
            Operation::Other => "other",
        }
    }
}

/// Per-operation counters, one `AtomicU64` per variant to avoid false
/// sharing between frequently-updated counters.
#[derive(Default)]
struct OperationCounters {
    acquire: AtomicU64,
    sync: AtomicU64,
    seek: AtomicU64,
    corpus_insert: AtomicU64,
    transfer: AtomicU64,
    other: AtomicU64,
}

/// Latency sums paired with [`OperationCounters`]; divide by count for
/// a per-operation average.
#[derive(Default)]
struct OperationLatencies {
    acquire: AtomicU64,
    sync: AtomicU64,
    seek: AtomicU64,
    corpus_insert: AtomicU64,
    transfer: AtomicU64,
    other: AtomicU64,
}

impl OperationCounters {
    fn counter(&self, op: Operation) -> &AtomicU64 {
        match op {
            Operation::Acquire => &self.acquire,
            Operation::Sync => &self.sync,
            Operation::Seek => &self.seek,
            Operation::CorpusInsert => &self.corpus_insert,
            Operation::Transfer => &self.transfer,
            Operation::Other => &self.other,
        }
    }
}

impl OperationLatencies {
    fn sum(&self, op: Operation) -> &AtomicU64 {
        match op {
            Operation::Acquire => &self.acquire,
            Operation::Sync => &self.sync,
            Operation::Seek => &self.seek,
            Operation::CorpusInsert => &self.corpus_insert,
            Operation::Transfer => &self.transfer,
            Operation::Other => &self.other,
        }
    }
}

/// A recorded slow operation.
#[derive(Clone, Debug, PartialEq)]
pub struct SlowOperation {
    pub operation: &'static str,
    pub duration_us: u64,
}

/// Per-operation average latency, reported in [`MetricsSnapshot`].
#[derive(Clone, Debug, PartialEq)]
pub struct OperationStat {
    pub operation: &'static str,
    pub count: u64,
    pub avg_us: u64,
}

/// Point-in-time copy of all metrics; plain types, safe to serialize.
#[derive(Clone, Debug, Default)]
pub struct MetricsSnapshot {
    pub op_count: u64,
    pub slow_op_count: u64,
    pub latency_p50_us: u64,
    pub latency_p95_us: u64,
    pub latency_p99_us: u64,
    pub latency_avg_us: u64,
    pub top_slow_operations: Vec<SlowOperation>,
    pub uptime_secs: u64,
    pub op_stats: Vec<OperationStat>,
}

/// Thread-safe metrics collector for one kernel instance. Wrap in `Arc`
/// and share across threads touching segments/chunks.
pub struct Metrics {
    op_count: AtomicU64,
    slow_op_count: AtomicU64,
    latencies_us: Mutex<VecDeque<u64>>,
    latency_sum_us: AtomicU64,
    op_counts: OperationCounters,
    op_latency_sums: OperationLatencies,
    slow_ops: Mutex<VecDeque<SlowOperation>>,
    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            op_count: AtomicU64::new(0),
            slow_op_count: AtomicU64::new(0),
            latencies_us: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW_SIZE)),
            latency_sum_us: AtomicU64::new(0),
            op_counts: OperationCounters::default(),
            op_latency_sums: OperationLatencies::default(),
            slow_ops: Mutex::new(VecDeque::with_capacity(MAX_SLOW_OPERATIONS)),
            started_at: Instant::now(),
        }
    }

    /// Record one completed operation. Updates the global/per-op
    /// counters, the rolling latency window, and the slow-operation log
    /// when `duration_us >= SLOW_OPERATION_THRESHOLD_US`.
    pub fn record(&self, op: Operation, duration_us: u64) {
        self.op_count.fetch_add(1, Ordering::Relaxed);
        self.op_counts.counter(op).fetch_add(1, Ordering::Relaxed);
        self.op_latency_sums.sum(op).fetch_add(duration_us, Ordering::Relaxed);

        {
            let mut latencies = self.latencies_us.lock().unwrap();
            if latencies.len() >= LATENCY_WINDOW_SIZE {
                if let Some(old) = latencies.pop_front() {
                    self.latency_sum_us.fetch_sub(old, Ordering::Relaxed);
                }
            }
            latencies.push_back(duration_us);
            self.latency_sum_us.fetch_add(duration_us, Ordering::Relaxed);
        }

        if duration_us >= SLOW_OPERATION_THRESHOLD_US {
            self.slow_op_count.fetch_add(1, Ordering::Relaxed);
            let mut slow = self.slow_ops.lock().unwrap();
            if slow.len() >= MAX_SLOW_OPERATIONS {
                slow.pop_front();
            }
            slow.push_back(SlowOperation {
                operation: op.name(),
                duration_us,
            });
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let op_count = self.op_count.load(Ordering::Relaxed);
        let slow_op_count = self.slow_op_count.load(Ordering::Relaxed);

        let (p50, p95, p99, avg) = {
            let latencies = self.latencies_us.lock().unwrap();
            if latencies.is_empty() {
                (0, 0, 0, 0)
            } else {
                let mut sorted: Vec<u64> = latencies.iter().copied().collect();
                sorted.sort_unstable();
                let len = sorted.len();
                let p50 = sorted[len * 50 / 100];
                let p95 = sorted[len * 95 / 100];
                let p99 = sorted.get(len * 99 / 100).copied().unwrap_or(sorted[len - 1]);
                let avg = self.latency_sum_us.load(Ordering::Relaxed) / len as u64;
                (p50, p95, p99, avg)
            }
        };

        let top_slow = self.slow_ops.lock().unwrap().iter().cloned().collect();

        MetricsSnapshot {
            op_count,
            slow_op_count,
            latency_p50_us: p50,
            latency_p95_us: p95,
            latency_p99_us: p99,
            latency_avg_us: avg,
            top_slow_operations: top_slow,
            uptime_secs: self.started_at.elapsed().as_secs(),
            op_stats: self.op_stats(),
        }
    }

    fn op_stats(&self) -> Vec<OperationStat> {
        [
            Operation::Acquire,
            Operation::Sync,
            Operation::Seek,
            Operation::CorpusInsert,
            Operation::Transfer,
            Operation::Other,
        ]
        .into_iter()
        .filter_map(|op| {
            let count = self.op_counts.counter(op).load(Ordering::Relaxed);
            if count == 0 {
                return None;
            }
            let sum = self.op_latency_sums.sum(op).load(Ordering::Relaxed);
            Some(OperationStat {
                operation: op.name(),
                count,
                avg_us: sum / count,
            })
        })
        .collect()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
