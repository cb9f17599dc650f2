//! Pipeline counters.
//!
//! Counters use atomics so sessions and HTTP handlers can read them while
//! the producer runs; increments are `Relaxed` since nothing orders on
//! them.

use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters owned by the broadcaster.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    records_dispatched: AtomicU64,
    rows_ignored: AtomicU64,
    subscribers_attached: AtomicU64,
    subscribers_dropped: AtomicU64,
    tee_errors: AtomicU64,
}

impl PipelineMetrics {
    pub(crate) fn add_record_dispatched(&self) {
        self.records_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_row_ignored(&self) {
        self.rows_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_subscriber_attached(&self) {
        self.subscribers_attached.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_subscriber_dropped(&self) {
        self.subscribers_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_tee_error(&self) {
        self.tee_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_dispatched: self.records_dispatched.load(Ordering::Relaxed),
            rows_ignored: self.rows_ignored.load(Ordering::Relaxed),
            subscribers_attached: self.subscribers_attached.load(Ordering::Relaxed),
            subscribers_dropped: self.subscribers_dropped.load(Ordering::Relaxed),
            tee_errors: self.tee_errors.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Records (samples and breaks) fanned out to subscribers.
    pub records_dispatched: u64,
    /// Input rows skipped by the reader.
    pub rows_ignored: u64,
    /// Total attach operations over the process lifetime.
    pub subscribers_attached: u64,
    /// Subscribers evicted for falling behind.
    pub subscribers_dropped: u64,
    /// Tee sink write failures (never fatal to the broadcast).
    pub tee_errors: u64,
}
