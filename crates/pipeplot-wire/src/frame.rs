//! Envelope encoding and decoding.
//!
//! Every frame is an 8-byte header followed by a payload of exactly the
//! declared length. All integers and floats are little-endian.
//!
//! ```text
//! offset  size  field
//! 0       1     version (currently 1)
//! 1       2     reserved (echoed on round-trip, any value accepted)
//! 3       1     type (0x01 data, 0x02 metadata, 0x03 stream-end)
//! 4       4     payload length in bytes, u32 LE
//! ```
//!
//! DATA payload: `series_id` u32 LE, pair count u32 LE, then all x values
//! as f64 LE, then all y values in the same order. A zero pair count is
//! the series-break sentinel. METADATA and STREAM_END payloads are a
//! u32 LE byte length followed by exactly that many UTF-8 JSON bytes.

use crate::error::FrameError;
use crate::payload::{DataBatch, MessageKind, Payload, StreamEnd};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use pipeplot_core::{Metadata, Terminal};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// The only protocol version this codec speaks.
pub const PROTOCOL_VERSION: u8 = 1;

/// Envelope header size in bytes.
pub const HEADER_LEN: usize = 8;

/// Fixed part of a DATA payload (series id + pair count).
const DATA_PREFIX_LEN: usize = 8;

/// Fixed part of a JSON payload (byte length).
const JSON_PREFIX_LEN: usize = 4;

/// One complete wire frame: envelope fields plus payload.
///
/// `kind` normally mirrors the payload variant; the two are carried
/// separately because decode must report a header/payload disagreement
/// rather than silently repair it, and encode must reject one.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Protocol version byte.
    pub version: u8,
    /// Two reserved bytes, preserved verbatim across round-trips.
    pub reserved: [u8; 2],
    /// Header type byte.
    pub kind: MessageKind,
    /// The payload.
    pub payload: Payload,
}

impl Frame {
    /// Creates a version-1 frame with zeroed reserved bytes.
    pub fn new(payload: Payload) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            reserved: [0; 2],
            kind: payload.kind(),
            payload,
        }
    }

    /// A DATA frame for one series batch.
    pub fn data(batch: DataBatch) -> Self {
        Self::new(Payload::Data(batch))
    }

    /// The one-per-session METADATA frame.
    pub fn metadata(metadata: Metadata) -> Self {
        Self::new(Payload::Metadata(metadata))
    }

    /// The terminal STREAM_END frame.
    pub fn stream_end(terminal: &Terminal) -> Self {
        Self::new(Payload::StreamEnd(StreamEnd::from(terminal)))
    }

    /// Encodes the frame into a contiguous buffer.
    ///
    /// Fails with [`FrameError::PayloadTypeMismatch`] if `kind` disagrees
    /// with the payload variant, and rejects DATA batches whose x and y
    /// lengths differ.
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        if self.kind != self.payload.kind() {
            return Err(FrameError::PayloadTypeMismatch(self.kind.byte()));
        }

        let body = match &self.payload {
            Payload::Data(batch) => encode_data(batch)?,
            Payload::Metadata(metadata) => encode_json(metadata)?,
            Payload::StreamEnd(end) => encode_json(end)?,
        };

        let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
        buf.put_u8(self.version);
        buf.put_slice(&self.reserved);
        buf.put_u8(self.kind.byte());
        buf.put_u32_le(body.len() as u32);
        buf.put_slice(&body);
        Ok(buf.freeze())
    }

    /// Decodes one frame from a buffer that must contain exactly one frame.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < HEADER_LEN {
            return Err(FrameError::BufferTooShort {
                need: HEADER_LEN,
                have: buf.len(),
            });
        }

        let version = buf[0];
        let reserved = [buf[1], buf[2]];
        let kind =
            MessageKind::from_byte(buf[3]).ok_or(FrameError::UnknownMessageType(buf[3]))?;
        let declared = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;

        let body = &buf[HEADER_LEN..];
        if body.len() < declared {
            return Err(FrameError::BufferTooShort {
                need: HEADER_LEN + declared,
                have: buf.len(),
            });
        }
        if body.len() > declared {
            return Err(FrameError::BufferSizeMismatch {
                declared: HEADER_LEN + declared,
                found: buf.len(),
            });
        }

        let payload = match kind {
            MessageKind::Data => Payload::Data(decode_data(body)?),
            MessageKind::Metadata => Payload::Metadata(decode_json(body)?),
            MessageKind::StreamEnd => Payload::StreamEnd(decode_json(body)?),
        };

        Ok(Self {
            version,
            reserved,
            kind,
            payload,
        })
    }
}

fn encode_data(batch: &DataBatch) -> Result<Bytes, FrameError> {
    if batch.xs.len() != batch.ys.len() {
        // The declared pair count could not describe both arrays.
        return Err(FrameError::BufferSizeMismatch {
            declared: DATA_PREFIX_LEN + 16 * batch.xs.len(),
            found: DATA_PREFIX_LEN + 8 * (batch.xs.len() + batch.ys.len()),
        });
    }

    let mut buf = BytesMut::with_capacity(DATA_PREFIX_LEN + 16 * batch.len());
    buf.put_u32_le(batch.series_id);
    buf.put_u32_le(batch.len() as u32);
    for x in &batch.xs {
        buf.put_f64_le(*x);
    }
    for y in &batch.ys {
        buf.put_f64_le(*y);
    }
    Ok(buf.freeze())
}

fn decode_data(mut body: &[u8]) -> Result<DataBatch, FrameError> {
    if body.len() < DATA_PREFIX_LEN {
        return Err(FrameError::BufferTooShort {
            need: DATA_PREFIX_LEN,
            have: body.len(),
        });
    }

    let total = body.len();
    let series_id = body.get_u32_le();
    let length = body.get_u32_le() as usize;

    let expected = DATA_PREFIX_LEN + 16 * length;
    if total < expected {
        return Err(FrameError::BufferTooShort {
            need: expected,
            have: total,
        });
    }
    if total > expected {
        return Err(FrameError::BufferSizeMismatch {
            declared: expected,
            found: total,
        });
    }

    let mut xs = Vec::with_capacity(length);
    for _ in 0..length {
        xs.push(body.get_f64_le());
    }
    let mut ys = Vec::with_capacity(length);
    for _ in 0..length {
        ys.push(body.get_f64_le());
    }

    Ok(DataBatch { series_id, xs, ys })
}

fn encode_json<T: Serialize>(value: &T) -> Result<Bytes, FrameError> {
    let json = serde_json::to_vec(value).map_err(|e| FrameError::MalformedJson(e.to_string()))?;
    let mut buf = BytesMut::with_capacity(JSON_PREFIX_LEN + json.len());
    buf.put_u32_le(json.len() as u32);
    buf.put_slice(&json);
    Ok(buf.freeze())
}

fn decode_json<T: DeserializeOwned>(mut body: &[u8]) -> Result<T, FrameError> {
    if body.len() < JSON_PREFIX_LEN {
        return Err(FrameError::BufferTooShort {
            need: JSON_PREFIX_LEN,
            have: body.len(),
        });
    }

    let total = body.len();
    let declared = body.get_u32_le() as usize;
    let expected = JSON_PREFIX_LEN + declared;
    if total < expected {
        return Err(FrameError::BufferTooShort {
            need: expected,
            have: total,
        });
    }
    if total > expected {
        return Err(FrameError::BufferSizeMismatch {
            declared: expected,
            found: total,
        });
    }

    serde_json::from_slice(body).map_err(|e| FrameError::MalformedJson(e.to_string()))
}
