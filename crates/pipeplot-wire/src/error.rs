//! Error taxonomy for frame encoding and decoding.

use thiserror::Error;

/// Errors from the frame codec. Each failure mode is its own kind so
/// callers (and tests) can tell truncation from corruption.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The buffer ends before its declared content does.
    #[error("buffer too short: need {need} bytes, have {have}")]
    BufferTooShort {
        /// Bytes required to satisfy the declared lengths.
        need: usize,
        /// Bytes actually present.
        have: usize,
    },

    /// The buffer carries more bytes than its declared lengths account for.
    #[error("buffer size mismatch: declared {declared} bytes, found {found}")]
    BufferSizeMismatch {
        /// Bytes the headers declare.
        declared: usize,
        /// Bytes actually present.
        found: usize,
    },

    /// The envelope's type byte is not a known message type.
    #[error("unknown message type {0:#04x}")]
    UnknownMessageType(u8),

    /// On encode: the payload variant disagrees with the header type.
    #[error("payload does not match header type {0:#04x}")]
    PayloadTypeMismatch(u8),

    /// A metadata or stream-end body is not valid JSON for its schema.
    #[error("malformed json payload: {0}")]
    MalformedJson(String),
}
