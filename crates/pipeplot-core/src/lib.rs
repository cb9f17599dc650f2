//! pipeplot-core — ingest pipeline, rolling history, and fan-out.
//!
//! The pipeline turns a line-oriented numeric byte stream into
//! [`Sample`]s, retains a bounded rolling [`History`], and fans every
//! record out to subscribers through the [`Broadcaster`]:
//!
//! ```text
//! bytes -> LineReader -> Record -> Broadcaster -> per-subscriber queues
//! ```
//!
//! Key properties:
//!
//! - Attach is atomic with respect to dispatch: a new subscriber receives
//!   the retained history followed by every later record, gap-free.
//! - A slow subscriber is dropped, never waited on.
//! - Terminal state (clean EOF or input failure) is delivered exactly once
//!   per live subscriber and stays queryable afterwards.
//!
//! # Example
//!
//! ```ignore
//! use pipeplot_core::{Broadcaster, LineReader, PipelineConfig, ReadMode};
//! use std::sync::Arc;
//! use tokio::io::BufReader;
//!
//! let config = PipelineConfig::default();
//! let reader = LineReader::new(
//!     BufReader::new(tokio::io::stdin()),
//!     ReadMode::Relaxed,
//!     config.x_index,
//!     config.series_count(),
//!     config.expect_exact,
//! );
//!
//! let broadcaster = Arc::new(Broadcaster::new(&config));
//! broadcaster.start(reader, None)?;
//!
//! let mut subscriber = broadcaster.attach();
//! while let Some(item) = subscriber.next_item().await {
//!     // history first, then live records, then the terminal item
//! }
//! ```

mod broadcaster;
mod config;
mod history;
mod metrics;
mod reader;
mod sample;
mod tee;

pub use broadcaster::{BroadcastError, Broadcaster, Subscriber};
pub use config::{
    ConfigError, DisplayOptions, Metadata, PipelineConfig, ReadMode, DEFAULT_FLUSH_INTERVAL,
    DEFAULT_QUEUE_BOUND, HARD_WINDOW_CEILING,
};
pub use history::History;
pub use metrics::MetricsSnapshot;
pub use reader::{LineReader, ReadError, ReadOutcome, SampleSource};
pub use sample::{Record, Sample, StreamItem, Terminal};
pub use tee::{CsvTee, TeeSink};
