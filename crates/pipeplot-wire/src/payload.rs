//! The three payload kinds carried by the frame envelope.

use pipeplot_core::{Metadata, Terminal};
use serde::{Deserialize, Serialize};

/// Message type byte in the envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// Per-series batch of (x, y) pairs.
    Data = 0x01,
    /// One-time stream metadata, JSON-encoded.
    Metadata = 0x02,
    /// End of stream, JSON-encoded.
    StreamEnd = 0x03,
}

impl MessageKind {
    /// Parses the header type byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Data),
            0x02 => Some(Self::Metadata),
            0x03 => Some(Self::StreamEnd),
            _ => None,
        }
    }

    /// The wire byte for this kind.
    #[inline]
    pub fn byte(self) -> u8 {
        self as u8
    }
}

/// One DATA payload: an append-only delta for a single series.
///
/// `xs` and `ys` are index-aligned pairs. An empty batch is legal and
/// meaningful: it is the series-break sentinel, telling consumers not to
/// connect the points on either side of it.
#[derive(Debug, Clone, PartialEq)]
pub struct DataBatch {
    /// Series index, `0..N-1`, aligned with the metadata column order.
    pub series_id: u32,
    /// X values in production order.
    pub xs: Vec<f64>,
    /// Y values, one per x.
    pub ys: Vec<f64>,
}

impl DataBatch {
    /// Creates a batch of paired points.
    pub fn new(series_id: u32, xs: Vec<f64>, ys: Vec<f64>) -> Self {
        Self { series_id, xs, ys }
    }

    /// The explicit-discontinuity sentinel for one series.
    pub fn series_break(series_id: u32) -> Self {
        Self {
            series_id,
            xs: Vec::new(),
            ys: Vec::new(),
        }
    }

    /// Number of (x, y) pairs.
    #[inline]
    pub fn len(&self) -> usize {
        self.xs.len()
    }

    /// `true` for the series-break sentinel.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }
}

/// STREAM_END body. Wire field names are contract; keep them lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEnd {
    /// `true` when the ingest terminated on a failure.
    pub error: bool,
    /// Failure text; empty on clean EOF.
    pub msg: String,
}

impl From<&Terminal> for StreamEnd {
    fn from(terminal: &Terminal) -> Self {
        Self {
            error: terminal.error,
            msg: terminal.message.clone(),
        }
    }
}

/// A decoded payload, one variant per [`MessageKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Per-series data batch.
    Data(DataBatch),
    /// Stream metadata.
    Metadata(Metadata),
    /// Stream end.
    StreamEnd(StreamEnd),
}

impl Payload {
    /// The message kind this payload belongs under.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Data(_) => MessageKind::Data,
            Self::Metadata(_) => MessageKind::Metadata,
            Self::StreamEnd(_) => MessageKind::StreamEnd,
        }
    }
}
