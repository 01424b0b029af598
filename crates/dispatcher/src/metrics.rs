//! Sink metrics for observability

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use contracts::ContractError;

/// Hub-side metrics for a single sink
#[derive(Debug, Default)]
pub struct SinkMetrics {
    /// Total successful deliveries
    delivered_count: AtomicU64,
    /// Total failed deliveries (errors and panics)
    failure_count: AtomicU64,
    /// Most recent failure
    last_error: Mutex<Option<String>>,
}

impl SinkMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered_count.load(Ordering::Relaxed)
    }

    pub fn inc_delivered_count(&self) {
        self.delivered_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Count a failure and remember it as the last error
    pub fn record_failure(&self, error: &ContractError) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error.to_string());
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            delivered_count: self.delivered_count(),
            failure_count: self.failure_count(),
            last_error: self.last_error(),
        }
    }
}

/// Snapshot of sink metrics (for reporting)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub delivered_count: u64,
    pub failure_count: u64,
    pub last_error: Option<String>,
}

/// Metrics of a [`QueuedSink`](crate::QueuedSink), updated by callers and its worker
#[derive(Debug, Default)]
pub struct QueueMetrics {
    /// Events admitted into the queue
    enqueued: AtomicU64,
    /// Events the wrapped sink accepted
    delivered: AtomicU64,
    /// Events that failed for good (retries exhausted or permanent error)
    failed: AtomicU64,
    /// Extra delivery attempts
    retried: AtomicU64,
    /// Events rejected or evicted by the admission policy
    dropped: AtomicU64,
    /// Events still queued when the shutdown deadline expired
    abandoned: AtomicU64,
    /// Current queue length
    pending: AtomicUsize,
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn inc_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn inc_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    pub fn inc_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn inc_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }

    pub fn add_abandoned(&self, count: u64) {
        self.abandoned.fetch_add(count, Ordering::Relaxed);
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    pub fn set_pending(&self, len: usize) {
        self.pending.store(len, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            enqueued: self.enqueued(),
            delivered: self.delivered(),
            failed: self.failed(),
            retried: self.retried(),
            dropped: self.dropped(),
            abandoned: self.abandoned(),
            pending: self.pending(),
        }
    }
}

/// Snapshot of queue metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueSnapshot {
    pub enqueued: u64,
    pub delivered: u64,
    pub failed: u64,
    pub retried: u64,
    pub dropped: u64,
    pub abandoned: u64,
    pub pending: usize,
}
