//! Tolerant line-oriented numeric input parsing.
//!
//! Two tokenizers are supported, selected at construction:
//!
//! - **Strict**: each line is one quoted-CSV record (`csv` crate rules).
//! - **Relaxed**: each line is split on runs of spaces/tabs or single
//!   commas, with empty fields discarded. A blank line is an explicit
//!   series break.
//!
//! Per-row failures are never fatal: the row is skipped and reported as
//! [`ReadOutcome::Ignored`]. Only underlying I/O failures terminate the
//! ingest.

use crate::config::ReadMode;
use crate::sample::{Record, Sample};
use regex::Regex;
use std::future::Future;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

/// Fatal ingest errors. Per-row parse problems are not errors; they
/// surface as [`ReadOutcome::Ignored`].
#[derive(Debug, Error)]
pub enum ReadError {
    /// The underlying byte source failed.
    #[error("input read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of asking a source for its next record.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A well-formed record (sample or series break).
    Parsed(Record),
    /// A malformed row that was skipped; the stream continues.
    Ignored,
    /// Clean end of input.
    EndOfInput,
    /// The source failed; the stream terminates with an error.
    Fatal(ReadError),
}

/// Anything the broadcaster can drain records from.
///
/// The production implementation is [`LineReader`]; tests drive the
/// broadcaster with scripted sources instead.
pub trait SampleSource: Send {
    /// Produces the next outcome. Cancel-safe only between calls.
    fn next_record(&mut self) -> impl Future<Output = ReadOutcome> + Send;
}

/// Splitter for relaxed mode: runs of blanks, or a single comma.
fn relaxed_splitter() -> &'static Regex {
    static SPLITTER: OnceLock<Regex> = OnceLock::new();
    SPLITTER.get_or_init(|| Regex::new(r"[ \t]+|,").expect("relaxed splitter is a valid literal"))
}

/// Wall-clock x for rows without their own: microseconds cast to seconds.
fn generated_x() -> f64 {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros();
    micros as f64 / 1_000_000.0
}

/// Converts a byte source into a lazy sequence of [`Record`]s.
pub struct LineReader<R> {
    input: R,
    mode: ReadMode,
    /// Field index of x within each row; `None` generates wall-clock x.
    x_index: Option<usize>,
    series_count: usize,
    expect_exact: bool,
    /// Reused line buffer; `read_until` appends raw bytes here.
    line: Vec<u8>,
    line_no: u64,
}

impl<R: AsyncBufRead + Unpin + Send> LineReader<R> {
    /// Creates a reader over `input` with the given row shape.
    pub fn new(
        input: R,
        mode: ReadMode,
        x_index: Option<usize>,
        series_count: usize,
        expect_exact: bool,
    ) -> Self {
        Self {
            input,
            mode,
            x_index,
            series_count,
            expect_exact,
            line: Vec::with_capacity(256),
            line_no: 0,
        }
    }

    /// Reads and parses one line.
    async fn read_one(&mut self) -> ReadOutcome {
        self.line.clear();
        match self.input.read_until(b'\n', &mut self.line).await {
            Ok(0) => ReadOutcome::EndOfInput,
            Ok(_) => {
                self.line_no += 1;
                // Lossy conversion keeps a stray bad byte from killing the
                // stream; the affected fields simply fail to parse.
                let text = String::from_utf8_lossy(&self.line);
                self.parse_line(text.trim_end_matches(['\r', '\n']))
            }
            Err(e) => ReadOutcome::Fatal(ReadError::Io(e)),
        }
    }

    fn parse_line(&self, line: &str) -> ReadOutcome {
        let fields = match self.mode {
            ReadMode::Strict => match tokenize_strict(line) {
                Some(fields) => fields,
                None => {
                    debug!(line = self.line_no, "skipping malformed csv row");
                    return ReadOutcome::Ignored;
                }
            },
            ReadMode::Relaxed => {
                if line.trim().is_empty() {
                    return ReadOutcome::Parsed(Record::Break);
                }
                tokenize_relaxed(line)
            }
        };

        if fields.is_empty() {
            debug!(line = self.line_no, "skipping empty row");
            return ReadOutcome::Ignored;
        }

        let mut values = Vec::with_capacity(fields.len());
        for field in &fields {
            match field.trim().parse::<f64>() {
                Ok(v) => values.push(v),
                Err(_) => {
                    debug!(line = self.line_no, field = %field, "skipping non-numeric row");
                    return ReadOutcome::Ignored;
                }
            }
        }

        let (x, mut ys) = match self.x_index {
            Some(idx) => {
                if idx >= values.len() {
                    debug!(line = self.line_no, x_index = idx, "skipping row without x field");
                    return ReadOutcome::Ignored;
                }
                let x = values.remove(idx);
                (x, values)
            }
            None => (generated_x(), values),
        };

        if ys.len() != self.series_count {
            // Exact mode skips mismatched rows outright. Otherwise extra
            // values are dropped, but a short row still cannot satisfy the
            // fixed sample arity and is skipped.
            if self.expect_exact || ys.len() < self.series_count {
                debug!(
                    line = self.line_no,
                    got = ys.len(),
                    want = self.series_count,
                    "skipping row with wrong series count"
                );
                return ReadOutcome::Ignored;
            }
            ys.truncate(self.series_count);
        }

        ReadOutcome::Parsed(Record::Sample(Sample::new(x, ys)))
    }
}

impl<R: AsyncBufRead + Unpin + Send> SampleSource for LineReader<R> {
    async fn next_record(&mut self) -> ReadOutcome {
        self.read_one().await
    }
}

/// Tokenizes one line as a quoted-CSV record. `None` on malformed input.
fn tokenize_strict(line: &str) -> Option<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());
    let mut record = csv::StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => Some(record.iter().map(str::to_owned).collect()),
        Ok(false) | Err(_) => None,
    }
}

/// Splits on `[ \t]+|,` and discards empty fields.
fn tokenize_relaxed(line: &str) -> Vec<String> {
    relaxed_splitter()
        .split(line)
        .filter(|field| !field.is_empty())
        .map(str::to_owned)
        .collect()
}
