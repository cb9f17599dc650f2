//! Pipeline configuration and the immutable metadata value object.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Hard ceiling on the retained history, regardless of the configured window.
pub const HARD_WINDOW_CEILING: usize = 25_000;

/// Default bound on each subscriber queue.
///
/// Empirical: large enough that a briefly stalled client survives a burst,
/// small enough that a dead one is dropped before it holds real memory.
pub const DEFAULT_QUEUE_BOUND: usize = 10_000;

/// Default per-series flush interval for streaming sessions.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(50);

/// Input tokenization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Quoted-CSV tokenization; malformed lines are skipped.
    Strict,
    /// Split on runs of spaces/tabs or single commas; empty fields dropped.
    Relaxed,
}

/// Errors detected while validating a configuration at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The retention window must hold at least one sample.
    #[error("window size must be positive")]
    ZeroWindow,
    /// At least one series column must be declared.
    #[error("at least one column must be declared")]
    NoColumns,
    /// Subscriber queues must hold at least one item.
    #[error("queue bound must be positive")]
    ZeroQueueBound,
    /// A zero flush interval would busy-loop every session.
    #[error("flush interval must be positive")]
    ZeroFlushInterval,
}

/// Immutable configuration consumed by the ingest pipeline and sessions.
///
/// Built once at startup (normally from CLI options) and shared by value
/// or behind an `Arc` for the process lifetime.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Requested retention window; capped by [`HARD_WINDOW_CEILING`].
    pub window_size: usize,
    /// Index of the x field within each row, or `None` to generate a
    /// wall-clock x per row.
    pub x_index: Option<usize>,
    /// Tokenization mode for the input stream.
    pub mode: ReadMode,
    /// Declared series labels; their count fixes the sample arity.
    pub columns: Vec<String>,
    /// When set, rows whose y count differs from the declared column
    /// count are skipped instead of truncated.
    pub expect_exact: bool,
    /// Per-series flush interval for streaming sessions.
    pub flush_interval: Duration,
    /// Bound on each subscriber queue (tunable; see `DEFAULT_QUEUE_BOUND`).
    pub queue_bound: usize,
    /// Whether x values are timestamps (display hint, forwarded in metadata).
    pub x_is_timestamp: bool,
    /// Whether the display should re-zero the x axis at the first sample.
    pub relative_start: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_size: 1_000,
            x_index: None,
            mode: ReadMode::Relaxed,
            columns: vec!["y".to_owned()],
            expect_exact: false,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            queue_bound: DEFAULT_QUEUE_BOUND,
            x_is_timestamp: true,
            relative_start: false,
        }
    }
}

impl PipelineConfig {
    /// Checks the startup invariants. Called once before the pipeline spawns.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.columns.is_empty() {
            return Err(ConfigError::NoColumns);
        }
        if self.queue_bound == 0 {
            return Err(ConfigError::ZeroQueueBound);
        }
        if self.flush_interval.is_zero() {
            return Err(ConfigError::ZeroFlushInterval);
        }
        Ok(())
    }

    /// Effective history capacity: `min(window_size, HARD_WINDOW_CEILING)`.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.window_size.min(HARD_WINDOW_CEILING)
    }

    /// Number of declared series.
    #[inline]
    pub fn series_count(&self) -> usize {
        self.columns.len()
    }
}

/// Display options forwarded verbatim to clients inside the metadata.
///
/// The serialized field names are wire-level contract with existing
/// front-ends; do not rename them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayOptions {
    /// Chart title.
    #[serde(rename = "Title")]
    pub title: String,
    /// Series labels, index-aligned with wire series ids.
    #[serde(rename = "Columns")]
    pub columns: Vec<String>,
    /// X axis label.
    #[serde(rename = "XLabel")]
    pub x_label: String,
    /// Y axis label.
    #[serde(rename = "YLabel")]
    pub y_label: String,
    /// Optional fixed lower bound for the y axis.
    #[serde(rename = "YMin")]
    pub y_min: Option<f64>,
    /// Optional fixed upper bound for the y axis.
    #[serde(rename = "YMax")]
    pub y_max: Option<f64>,
    /// Unit suffix for y values.
    #[serde(rename = "YUnit")]
    pub y_unit: String,
    /// Chart kind understood by the front-end (e.g. "line").
    #[serde(rename = "ChartType")]
    pub chart_type: String,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            title: "Pipe Plot".to_owned(),
            columns: vec!["y".to_owned()],
            x_label: String::new(),
            y_label: String::new(),
            y_min: None,
            y_max: None,
            y_unit: String::new(),
            chart_type: "line".to_owned(),
        }
    }
}

/// The one-per-process metadata value sent to every client on attach and
/// served at `GET /metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Effective retention window (post-ceiling).
    #[serde(rename = "WindowSize")]
    pub window_size: usize,
    /// Whether x values are timestamps.
    #[serde(rename = "XIsTimestamp")]
    pub x_is_timestamp: bool,
    /// Whether the x axis should restart at the first received sample.
    #[serde(rename = "RelativeStart")]
    pub relative_start: bool,
    /// Nested display options.
    #[serde(rename = "WesplotOptions")]
    pub options: DisplayOptions,
}

impl Metadata {
    /// Builds the process-lifetime metadata from config plus display options.
    pub fn new(config: &PipelineConfig, options: DisplayOptions) -> Self {
        Self {
            window_size: config.capacity(),
            x_is_timestamp: config.x_is_timestamp,
            relative_start: config.relative_start,
            options,
        }
    }
}
