//! ARSDK network frame codec
//!
//! Every message exchanged with a drone is framed as:
//! ```text
//! [ 1 byte: data type ][ 1 byte: buffer id ][ 1 byte: sequence ][ 4 bytes: size (u32, little-endian) ][ payload ]
//! ```
//!
//! `size` counts the whole frame including the 7-byte header. Sequence
//! numbers are kept per buffer id and wrap around.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the frame header in bytes
pub const HEADER_LEN: usize = 7;

/// Maximum frame size (1 MB) to prevent memory exhaustion
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("Invalid frame size field: {0}")]
    InvalidLength(u32),

    #[error("Unknown frame data type: {0}")]
    UnknownDataType(u8),

    #[error("Not enough data: need {needed} bytes, have {available}")]
    NotEnoughData { needed: usize, available: usize },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

/// How the receiver must treat a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataType {
    /// Acknowledgement of a `DataWithAck` frame; payload is the acked sequence
    Ack = 1,
    Data = 2,
    LowLatencyData = 3,
    DataWithAck = 4,
}

impl DataType {
    pub fn from_wire(value: u8) -> Result<Self, CodecError> {
        match value {
            1 => Ok(Self::Ack),
            2 => Ok(Self::Data),
            3 => Ok(Self::LowLatencyData),
            4 => Ok(Self::DataWithAck),
            other => Err(CodecError::UnknownDataType(other)),
        }
    }
}

/// Well-known buffer ids
pub mod buffer {
    /// Drone -> controller network ping
    pub const PING: u8 = 0;
    /// Controller -> drone ping answer
    pub const PONG: u8 = 1;
    /// Controller -> drone, no acknowledgement (piloting)
    pub const C2D_NON_ACK: u8 = 10;
    /// Controller -> drone, acknowledged commands
    pub const C2D_ACK: u8 = 11;
    /// Controller -> drone, emergency commands
    pub const C2D_EMERGENCY: u8 = 12;
    /// Drone -> controller video fragments
    pub const D2C_VIDEO: u8 = 125;
    /// Drone -> controller acknowledged events
    pub const D2C_EVENT: u8 = 126;
    /// Drone -> controller navdata, no acknowledgement
    pub const D2C_NAVDATA: u8 = 127;

    /// Buffer on which acknowledgements for `id` travel
    pub fn ack_for(id: u8) -> u8 {
        id.wrapping_add(128)
    }
}

/// A decoded network frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data_type: DataType,
    pub buffer_id: u8,
    pub sequence: u8,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(data_type: DataType, buffer_id: u8, sequence: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            data_type,
            buffer_id,
            sequence,
            payload: payload.into(),
        }
    }

    /// Acknowledgement for this frame
    pub fn ack(&self, sequence: u8) -> Self {
        Self::new(
            DataType::Ack,
            buffer::ack_for(self.buffer_id),
            sequence,
            Bytes::copy_from_slice(&[self.sequence]),
        )
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }
}

/// Encode a frame into a new byte buffer
pub fn encode(frame: &Frame) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::with_capacity(frame.encoded_len());
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a frame directly into a provided buffer
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) -> Result<(), CodecError> {
    let total = frame.encoded_len();

    if total > MAX_FRAME_SIZE as usize {
        return Err(CodecError::FrameTooLarge(total));
    }

    buf.reserve(total);
    buf.put_u8(frame.data_type as u8);
    buf.put_u8(frame.buffer_id);
    buf.put_u8(frame.sequence);
    buf.put_u32_le(total as u32);
    buf.put_slice(&frame.payload);

    Ok(())
}

/// Try to decode one frame from a buffer
///
/// Returns:
/// - `Ok(Some(frame))` if a complete frame was decoded
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if the data is invalid. A frame with an unknown data type is
///   consumed before the error is returned, so decoding can continue.
pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    // Peek at the size field without consuming
    let size = u32::from_le_bytes([buf[3], buf[4], buf[5], buf[6]]);

    if size < HEADER_LEN as u32 || size > MAX_FRAME_SIZE {
        return Err(CodecError::InvalidLength(size));
    }

    if buf.len() < size as usize {
        return Ok(None);
    }

    let mut raw = buf.split_to(size as usize);
    let data_type = raw.get_u8();
    let buffer_id = raw.get_u8();
    let sequence = raw.get_u8();
    raw.advance(4);

    let data_type = DataType::from_wire(data_type)?;

    Ok(Some(Frame {
        data_type,
        buffer_id,
        sequence,
        payload: raw.freeze(),
    }))
}

/// Decoder state machine for streaming decoding
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Partial frame data being accumulated
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete frames
    pub fn decode_next(&mut self) -> Result<Option<Frame>, CodecError> {
        decode(&mut self.buffer)
    }

    /// Get the current buffer length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Encoder for building frames, numbering each buffer independently
#[derive(Debug)]
pub struct FrameEncoder {
    /// Output buffer
    buffer: BytesMut,
    /// Next sequence number per buffer id
    sequences: [u8; 256],
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameEncoder {
    /// Create a new frame encoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            sequences: [0; 256],
        }
    }

    /// Take the next sequence number for a buffer
    pub fn next_sequence(&mut self, buffer_id: u8) -> u8 {
        let slot = &mut self.sequences[buffer_id as usize];
        let seq = *slot;
        *slot = slot.wrapping_add(1);
        seq
    }

    /// Frame a payload, add it to the output buffer and return its sequence number
    pub fn encode(
        &mut self,
        data_type: DataType,
        buffer_id: u8,
        payload: &[u8],
    ) -> Result<u8, CodecError> {
        let sequence = self.next_sequence(buffer_id);
        let frame = Frame::new(data_type, buffer_id, sequence, Bytes::copy_from_slice(payload));
        encode_into(&frame, &mut self.buffer)?;
        Ok(sequence)
    }

    /// Acknowledge a received frame
    pub fn encode_ack(&mut self, received: &Frame) -> Result<(), CodecError> {
        let ack_buffer = buffer::ack_for(received.buffer_id);
        let sequence = self.next_sequence(ack_buffer);
        encode_into(&received.ack(sequence), &mut self.buffer)
    }

    /// Take the encoded bytes, leaving an empty buffer
    pub fn take(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }

    /// Check if the encoder has any pending data
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
