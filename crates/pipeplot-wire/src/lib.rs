//! pipeplot-wire — the framed binary streaming protocol.
//!
//! A deterministic, little-endian, length-prefixed envelope carrying three
//! payload kinds: per-series DATA batches, one-time METADATA, and the
//! terminal STREAM_END. Version 1 only.
//!
//! Guarantees:
//!
//! - `decode(encode(frame)) == frame`, bit-exact for every float
//!   (including ±0, ±∞ and NaN payloads) and deep-equal for JSON bodies.
//! - Reserved header bytes are preserved across round-trips.
//! - Every malformed buffer maps to a distinct [`FrameError`] kind.
//! - A zero-length DATA batch is the series-break sentinel.

mod error;
mod frame;
mod payload;

pub use error::FrameError;
pub use frame::{Frame, HEADER_LEN, PROTOCOL_VERSION};
pub use payload::{DataBatch, MessageKind, Payload, StreamEnd};
