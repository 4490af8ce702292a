//! Wire protocol codec for hub IPC.
//!
//! Length-prefixed frames with a type byte:
//!
//! ```text
//! [u32 LE length] [u8 type] [payload: length-1 bytes]
//! ```
//!
//! Frame types:
//! - `0x01`: JSON message (UTF-8 `serde_json::Value`)
//!
//! Every JSON frame carries an [`Envelope`]: `{"type": <name>, "payload": <any>}`.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum frame length (16 MB), enforced by both encoder and decoder.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Largest envelope payload guaranteed to fit in one frame.
///
/// Leaves room for the type byte and the `{"type":..,"payload":..}` wrapper.
pub const MAX_PAYLOAD_SIZE: usize = MAX_FRAME_SIZE as usize - 256;

/// An outbound frame that the receiving decoder would refuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("frame of {size} bytes exceeds the {MAX_FRAME_SIZE} byte limit")]
pub struct FrameTooLarge {
    /// Frame length that was refused (type byte included).
    pub size: usize,
}

/// Frame type constants.
pub mod frame_type {
    /// JSON message.
    pub const JSON: u8 = 0x01;
}

/// A named message with an optional payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message name, e.g. `update-node-selections`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Message body. Absent and `null` are equivalent.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Envelope {
    /// Create an envelope.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Create an envelope with no payload.
    pub fn bare(kind: impl Into<String>) -> Self {
        Self::new(kind, Value::Null)
    }

    /// Read an envelope out of a JSON frame body.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not an object with a string `type`.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| anyhow!("Invalid envelope: {e}"))
    }

    /// Wrap this envelope in a JSON frame.
    pub fn to_frame(&self) -> Frame {
        Frame::Json(serde_json::to_value(self).unwrap_or(Value::Null))
    }

    /// Encode this envelope as wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FrameTooLarge`] if the frame would exceed [`MAX_FRAME_SIZE`].
    pub fn encode(&self) -> std::result::Result<Vec<u8>, FrameTooLarge> {
        self.to_frame().encode()
    }
}

/// A decoded frame from the wire protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// JSON message.
    Json(Value),
}

impl Frame {
    /// Encode this frame into a wire-format byte vector.
    ///
    /// Returns `[u32 LE length][u8 type][payload]`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameTooLarge`] if the frame would exceed [`MAX_FRAME_SIZE`].
    pub fn encode(&self) -> std::result::Result<Vec<u8>, FrameTooLarge> {
        match self {
            Frame::Json(value) => {
                let payload = serde_json::to_vec(value).unwrap_or_default();
                encode_raw(frame_type::JSON, &payload)
            }
        }
    }
}

/// Encode a raw frame with type byte and payload.
fn encode_raw(frame_type: u8, payload: &[u8]) -> std::result::Result<Vec<u8>, FrameTooLarge> {
    let size = payload.len() + 1; // +1 for type byte
    let length = u32::try_from(size)
        .ok()
        .filter(|&length| length <= MAX_FRAME_SIZE)
        .ok_or(FrameTooLarge { size })?;
    let mut buf = Vec::with_capacity(4 + 1 + payload.len());
    buf.extend_from_slice(&length.to_le_bytes());
    buf.push(frame_type);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Decode a single frame from a type byte and payload.
fn decode_frame(frame_type: u8, payload: &[u8]) -> Result<Frame> {
    match frame_type {
        frame_type::JSON => {
            let value: Value = serde_json::from_slice(payload)
                .map_err(|e| anyhow!("Invalid JSON frame: {e}"))?;
            Ok(Frame::Json(value))
        }
        _ => bail!("Unknown frame type: 0x{frame_type:02x}"),
    }
}

/// Incremental frame decoder that handles partial reads.
///
/// Feed bytes via [`FrameDecoder::feed`] and extract complete frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create a new decoder with empty buffer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feed bytes into the decoder and extract all complete frames.
    ///
    /// Returns decoded frames. Incomplete data is buffered for the next call.
    ///
    /// # Errors
    ///
    /// Returns an error if a frame is malformed or exceeds the size limit.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Frame>> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();

        loop {
            // Need at least 4 bytes for the length header
            if self.buf.len() < 4 {
                break;
            }

            let length = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);

            if length == 0 {
                bail!("Invalid frame: zero length");
            }
            if length > MAX_FRAME_SIZE {
                bail!("Frame too large: {length} bytes (max {MAX_FRAME_SIZE})");
            }

            let total = 4 + length as usize;
            if self.buf.len() < total {
                break;
            }

            let frame_type = self.buf[4];
            let frame = decode_frame(frame_type, &self.buf[5..total])?;
            frames.push(frame);

            self.buf.drain(..total);
        }

        Ok(frames)
    }

    /// Returns true if the decoder has buffered partial data.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}
