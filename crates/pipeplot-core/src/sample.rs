//! Sample data model shared by the ingest, history, and dispatch layers.

/// One parsed row: a single x value and one y value per declared series.
///
/// Every sample that reaches the broadcaster has exactly as many y values
/// as there are declared columns. The reader enforces this at parse time,
/// so downstream code may index `ys` by series id without checking.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// The x value (either parsed from the row or generated wall-clock seconds).
    pub x: f64,
    /// One y value per series, in declared column order.
    pub ys: Vec<f64>,
}

impl Sample {
    /// Creates a sample from an x value and its per-series y values.
    pub fn new(x: f64, ys: Vec<f64>) -> Self {
        Self { x, ys }
    }

    /// Returns the number of series this sample carries.
    #[inline]
    pub fn series_count(&self) -> usize {
        self.ys.len()
    }
}

/// What the reader produces on success and the history retains.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// A parsed data row.
    Sample(Sample),
    /// An explicit discontinuity: consumers must not connect the points
    /// on either side of it.
    Break,
}

/// End-of-ingest marker, set exactly once per pipeline lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Terminal {
    /// `true` when the ingest ended on an I/O failure rather than clean EOF.
    pub error: bool,
    /// Human-readable failure text; empty on clean EOF.
    pub message: String,
}

impl Terminal {
    /// Clean end of input.
    pub fn clean() -> Self {
        Self::default()
    }

    /// Errored end of input with the underlying failure text.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: true,
            message: message.into(),
        }
    }
}

/// Element type of a subscriber queue.
///
/// The terminal item is the last item ever enqueued on any queue; after it,
/// the sending side is gone and `recv` yields `None`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// A retained or live record.
    Record(Record),
    /// End of stream, clean or errored.
    Terminal(Terminal),
}
