//! Metrics collection for pool monitoring.

use crate::error::TaskError;
use hdrhistogram::Histogram;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Why a worker left the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireReason {
    /// No task arrived within the idle timeout.
    Idle,
    /// The pool is closing.
    Shutdown,
}

/// Pool metrics collector
#[derive(Debug)]
pub struct Metrics {
    // Task counters
    tasks_submitted: AtomicU64,
    tasks_succeeded: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_panicked: AtomicU64,
    tasks_abandoned: AtomicU64,
    retries: AtomicU64,

    // Worker lifecycle
    workers_spawned: AtomicU64,
    workers_retired_idle: AtomicU64,
    workers_retired_shutdown: AtomicU64,

    // Handler latency including retries, in nanoseconds
    latency_histogram: Option<RwLock<Histogram<u64>>>,

    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        // 1ns .. 1h, 3 significant figures
        let histogram = Histogram::new_with_bounds(1, 3_600_000_000_000, 3)
            .ok()
            .map(RwLock::new);

        Self {
            tasks_submitted: AtomicU64::new(0),
            tasks_succeeded: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            tasks_panicked: AtomicU64::new(0),
            tasks_abandoned: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            workers_spawned: AtomicU64::new(0),
            workers_retired_idle: AtomicU64::new(0),
            workers_retired_shutdown: AtomicU64::new(0),
            latency_histogram: histogram,
            start_time: Instant::now(),
        }
    }

    pub fn record_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the final outcome of a task a worker ran. Tasks that never
    /// reached a worker go through [`Metrics::record_abandoned`].
    pub fn record_outcome(&self, elapsed: Duration, outcome: &Result<(), TaskError>) {
        match outcome {
            Ok(()) => {
                self.tasks_succeeded.fetch_add(1, Ordering::Relaxed);
            }
            Err(TaskError::HandlerFault(_)) => {
                self.tasks_panicked.fetch_add(1, Ordering::Relaxed);
                self.tasks_failed.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.tasks_failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        if let Some(histogram) = &self.latency_histogram {
            if let Some(mut hist) = histogram.try_write() {
                let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
                hist.saturating_record(nanos.max(1));
            }
        }
    }

    pub fn record_abandoned(&self) {
        self.tasks_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_spawned(&self) {
        self.workers_spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_retired(&self, reason: RetireReason) {
        let counter = match reason {
            RetireReason::Idle => &self.workers_retired_idle,
            RetireReason::Shutdown => &self.workers_retired_shutdown,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (avg, p50, p99, max) = match self.latency_histogram.as_ref().map(|h| h.read()) {
            Some(hist) if hist.len() > 0 => (
                hist.mean() as u64,
                hist.value_at_quantile(0.50),
                hist.value_at_quantile(0.99),
                hist.max(),
            ),
            _ => (0, 0, 0, 0),
        };

        let spawned = self.workers_spawned.load(Ordering::Relaxed);
        let retired_idle = self.workers_retired_idle.load(Ordering::Relaxed);
        let retired_shutdown = self.workers_retired_shutdown.load(Ordering::Relaxed);

        MetricsSnapshot {
            timestamp: Instant::now(),
            uptime: self.start_time.elapsed(),
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_succeeded: self.tasks_succeeded.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_panicked: self.tasks_panicked.load(Ordering::Relaxed),
            tasks_abandoned: self.tasks_abandoned.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            workers_spawned: spawned,
            workers_retired_idle: retired_idle,
            workers_retired_shutdown: retired_shutdown,
            live_workers: spawned.saturating_sub(retired_idle + retired_shutdown),
            avg_latency_ns: avg,
            p50_latency_ns: p50,
            p99_latency_ns: p99,
            max_latency_ns: max,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub timestamp: Instant,
    pub uptime: Duration,
    pub tasks_submitted: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub tasks_panicked: u64,
    pub tasks_abandoned: u64,
    pub retries: u64,
    pub workers_spawned: u64,
    pub workers_retired_idle: u64,
    pub workers_retired_shutdown: u64,
    pub live_workers: u64,
    pub avg_latency_ns: u64,
    pub p50_latency_ns: u64,
    pub p99_latency_ns: u64,
    pub max_latency_ns: u64,
}

impl MetricsSnapshot {
    /// Tasks that reached a final outcome, abandoned ones included.
    pub fn tasks_finished(&self) -> u64 {
        self.tasks_succeeded + self.tasks_failed + self.tasks_abandoned
    }

    /// Calculate completed tasks per second
    pub fn tasks_per_second(&self) -> f64 {
        let seconds = self.uptime.as_secs_f64();
        if seconds == 0.0 {
            return 0.0;
        }
        (self.tasks_succeeded + self.tasks_failed) as f64 / seconds
    }
}
