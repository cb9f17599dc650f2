//! Optional CSV side channel written before broadcast.

use crate::sample::Sample;
use std::io::{self, Write};

/// Destination for the pass-through copy of every sample.
///
/// Failures must stay local to the sink; the broadcaster logs and keeps
/// dispatching.
pub trait TeeSink: Send {
    /// Writes one sample as a CSV row.
    fn write_row(&mut self, sample: &Sample) -> io::Result<()>;
}

/// Writes `x,y0,y1,...` rows with fixed six-decimal precision.
pub struct CsvTee<W> {
    out: W,
}

impl<W: Write + Send> CsvTee<W> {
    /// Creates a tee writing to `out`.
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write + Send> TeeSink for CsvTee<W> {
    fn write_row(&mut self, sample: &Sample) -> io::Result<()> {
        write!(self.out, "{:.6}", sample.x)?;
        for y in &sample.ys {
            write!(self.out, ",{y:.6}")?;
        }
        writeln!(self.out)?;
        // Line-buffered so downstream pipes see rows as they arrive.
        self.out.flush()
    }
}
