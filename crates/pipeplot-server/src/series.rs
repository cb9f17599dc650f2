//! Per-series batching, kept free of concurrency.
//!
//! A session decomposes each inbound sample into one point per series and
//! buffers those points here. The buffers decide when a series is due:
//! when it fills to capacity, or when its own time since last flush
//! exceeds the flush interval. One quiet series never delays another.
//!
//! The session task owns one `SeriesBuffers` and drives it from its
//! select loop, so no locks or atomics live here.

use pipeplot_core::Sample;
use pipeplot_wire::DataBatch;
use std::time::Duration;
use tokio::time::Instant;

struct SeriesBuffer {
    xs: Vec<f64>,
    ys: Vec<f64>,
    last_flush: Instant,
}

impl SeriesBuffer {
    fn new(capacity: usize, now: Instant) -> Self {
        Self {
            xs: Vec::with_capacity(capacity),
            ys: Vec::with_capacity(capacity),
            last_flush: now,
        }
    }

    fn take(&mut self, series_id: u32, capacity: usize, now: Instant) -> DataBatch {
        let xs = std::mem::replace(&mut self.xs, Vec::with_capacity(capacity));
        let ys = std::mem::replace(&mut self.ys, Vec::with_capacity(capacity));
        self.last_flush = now;
        DataBatch::new(series_id, xs, ys)
    }
}

/// Batching state for all series of one session.
pub struct SeriesBuffers {
    series: Vec<SeriesBuffer>,
    capacity: usize,
    flush_interval: Duration,
}

impl SeriesBuffers {
    /// Creates buffers for `series_count` series, each pre-allocated to
    /// `capacity` points.
    pub fn new(series_count: usize, capacity: usize, flush_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            series: (0..series_count)
                .map(|_| SeriesBuffer::new(capacity, now))
                .collect(),
            capacity,
            flush_interval,
        }
    }

    /// Number of series tracked.
    #[inline]
    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    /// Buffers one sample across all series; returns the batches for any
    /// series that reached capacity.
    ///
    /// The sample arity is fixed upstream, so each y lands in its
    /// index-aligned series.
    pub fn push(&mut self, sample: &Sample, now: Instant) -> Vec<DataBatch> {
        debug_assert_eq!(sample.ys.len(), self.series.len());

        let mut due = Vec::new();
        for (idx, (buffer, y)) in self.series.iter_mut().zip(&sample.ys).enumerate() {
            buffer.xs.push(sample.x);
            buffer.ys.push(*y);
            if buffer.xs.len() >= self.capacity {
                due.push(buffer.take(idx as u32, self.capacity, now));
            }
        }
        due
    }

    /// Returns the batches for every non-empty series whose flush interval
    /// has elapsed.
    pub fn take_due(&mut self, now: Instant) -> Vec<DataBatch> {
        let mut due = Vec::new();
        for (idx, buffer) in self.series.iter_mut().enumerate() {
            if !buffer.xs.is_empty()
                && now.duration_since(buffer.last_flush) >= self.flush_interval
            {
                due.push(buffer.take(idx as u32, self.capacity, now));
            }
        }
        due
    }

    /// Returns the batches for every non-empty series, due or not.
    /// Used before a series break and before stream end.
    pub fn flush_all(&mut self, now: Instant) -> Vec<DataBatch> {
        let mut due = Vec::new();
        for (idx, buffer) in self.series.iter_mut().enumerate() {
            if !buffer.xs.is_empty() {
                due.push(buffer.take(idx as u32, self.capacity, now));
            }
        }
        due
    }
}
