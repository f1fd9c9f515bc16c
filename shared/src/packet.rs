//! ARDrone3 binary command packets
//!
//! A packet is the payload of a network frame:
//! ```text
//! [ 1 byte: project ][ 1 byte: class ][ 2 bytes: command id (u16, little-endian) ][ arguments ]
//! ```
//!
//! All multi-byte arguments are little-endian. Strings are NUL-terminated.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::CodecError;

/// Size of the packet header in bytes
pub const PACKET_HEADER_LEN: usize = 4;

/// Protocol projects (the packet "type")
pub mod project {
    pub const COMMON: u8 = 0;
    pub const ARDRONE3: u8 = 1;
}

/// Classes of the common project
pub mod common_class {
    pub const NETWORK: u8 = 0;
    pub const SETTINGS: u8 = 2;
    pub const SETTINGS_STATE: u8 = 3;
    pub const COMMON: u8 = 4;
    pub const COMMON_STATE: u8 = 5;
    pub const CALIBRATION_STATE: u8 = 14;
}

/// Classes of the ARDrone3 project
pub mod ardrone3_class {
    pub const PILOTING: u8 = 0;
    pub const PILOTING_SETTINGS: u8 = 2;
    pub const PILOTING_STATE: u8 = 4;
    pub const MEDIA_RECORD: u8 = 7;
    pub const SPEED_SETTINGS: u8 = 11;
    pub const MEDIA_STREAMING: u8 = 21;
}

/// Command ids of the ARDrone3 piloting class
pub mod piloting {
    pub const FLAT_TRIM: u16 = 0;
    pub const TAKE_OFF: u16 = 1;
    pub const PCMD: u16 = 2;
    pub const LANDING: u16 = 3;
    pub const EMERGENCY: u16 = 4;
    pub const MOVE_TO: u16 = 10;
    pub const CANCEL_MOVE_TO: u16 = 11;
}

/// Command ids of the ARDrone3 piloting state class
pub mod piloting_state {
    pub const FLYING_STATE_CHANGED: u16 = 1;
    pub const ALERT_STATE_CHANGED: u16 = 2;
    pub const POSITION_CHANGED: u16 = 4;
    pub const SPEED_CHANGED: u16 = 5;
    pub const ATTITUDE_CHANGED: u16 = 6;
    pub const ALTITUDE_CHANGED: u16 = 8;
    pub const MOVE_TO_CHANGED: u16 = 12;
}

/// Latitude/longitude/altitude reported while the drone has no GPS fix
pub const UNKNOWN_POSITION: f64 = 500.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub project: u8,
    pub class: u8,
    pub command: u16,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(project: u8, class: u8, command: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            project,
            class,
            command,
            payload: payload.into(),
        }
    }

    /// Packet without arguments
    pub fn bare(project: u8, class: u8, command: u16) -> Self {
        Self::new(project, class, command, Bytes::new())
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PACKET_HEADER_LEN + self.payload.len());
        buf.put_u8(self.project);
        buf.put_u8(self.class);
        buf.put_u16_le(self.command);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    pub fn decode(mut data: Bytes) -> Result<Self, CodecError> {
        if data.len() < PACKET_HEADER_LEN {
            return Err(CodecError::NotEnoughData {
                needed: PACKET_HEADER_LEN,
                available: data.len(),
            });
        }
        let project = data.get_u8();
        let class = data.get_u8();
        let command = data.get_u16_le();
        Ok(Self {
            project,
            class,
            command,
            payload: data,
        })
    }

    /// Cursor over the arguments
    pub fn reader(&self) -> PayloadReader {
        PayloadReader::new(self.payload.clone())
    }
}

/// Bounds-checked little-endian reader over packet arguments
#[derive(Debug)]
pub struct PayloadReader {
    data: Bytes,
}

impl PayloadReader {
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    fn need(&self, n: usize) -> Result<(), CodecError> {
        if self.data.remaining() < n {
            return Err(CodecError::NotEnoughData {
                needed: n,
                available: self.data.remaining(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8, CodecError> {
        self.need(1)?;
        Ok(self.data.get_u8())
    }

    pub fn i8(&mut self) -> Result<i8, CodecError> {
        self.need(1)?;
        Ok(self.data.get_i8())
    }

    pub fn u16(&mut self) -> Result<u16, CodecError> {
        self.need(2)?;
        Ok(self.data.get_u16_le())
    }

    pub fn u32(&mut self) -> Result<u32, CodecError> {
        self.need(4)?;
        Ok(self.data.get_u32_le())
    }

    pub fn f32(&mut self) -> Result<f32, CodecError> {
        self.need(4)?;
        Ok(self.data.get_f32_le())
    }

    pub fn f64(&mut self) -> Result<f64, CodecError> {
        self.need(8)?;
        Ok(self.data.get_f64_le())
    }

    /// NUL-terminated string
    pub fn string(&mut self) -> Result<String, CodecError> {
        let end = self
            .data
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| CodecError::InvalidPayload("unterminated string".into()))?;
        let raw = self.data.split_to(end);
        self.data.advance(1);
        String::from_utf8(raw.to_vec())
            .map_err(|e| CodecError::InvalidPayload(format!("invalid utf-8 string: {e}")))
    }

    pub fn remaining(&self) -> usize {
        self.data.remaining()
    }
}

/// Append a NUL-terminated string argument
pub fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_slice(value.as_bytes());
    buf.put_u8(0);
}

/// Builders for the canonical controller -> drone commands
pub mod commands {
    use super::*;

    fn flag(value: bool) -> Bytes {
        Bytes::copy_from_slice(&[value as u8])
    }

    pub fn flat_trim() -> Packet {
        Packet::bare(project::ARDRONE3, ardrone3_class::PILOTING, piloting::FLAT_TRIM)
    }

    pub fn take_off() -> Packet {
        Packet::bare(project::ARDRONE3, ardrone3_class::PILOTING, piloting::TAKE_OFF)
    }

    pub fn landing() -> Packet {
        Packet::bare(project::ARDRONE3, ardrone3_class::PILOTING, piloting::LANDING)
    }

    /// Cut the motors immediately
    pub fn emergency() -> Packet {
        Packet::bare(project::ARDRONE3, ardrone3_class::PILOTING, piloting::EMERGENCY)
    }

    /// Ask the drone to send all of its states
    pub fn request_status() -> Packet {
        Packet::bare(project::COMMON, common_class::COMMON, 0)
    }

    /// Ask the drone to send all of its settings
    pub fn request_all_settings() -> Packet {
        Packet::bare(project::COMMON, common_class::SETTINGS, 0)
    }

    pub fn outdoor(outdoor: bool) -> Packet {
        Packet::new(project::ARDRONE3, ardrone3_class::SPEED_SETTINGS, 3, flag(outdoor))
    }

    pub fn set_max_altitude(meters: f32) -> Packet {
        let mut b = BytesMut::with_capacity(4);
        b.put_f32_le(meters);
        Packet::new(project::ARDRONE3, ardrone3_class::PILOTING_SETTINGS, 0, b.freeze())
    }

    pub fn set_max_tilt(degrees: f32) -> Packet {
        let mut b = BytesMut::with_capacity(4);
        b.put_f32_le(degrees);
        Packet::new(project::ARDRONE3, ardrone3_class::PILOTING_SETTINGS, 1, b.freeze())
    }

    /// Piloting command. Roll, pitch, yaw and gaz are percentages in [-100, 100].
    pub fn move_3d(use_roll: bool, roll: i8, pitch: i8, yaw: i8, gaz: i8) -> Packet {
        let clamp = |v: i8| v.clamp(-100, 100);
        let mut b = BytesMut::with_capacity(9);
        b.put_u8(use_roll as u8);
        b.put_i8(clamp(roll));
        b.put_i8(clamp(pitch));
        b.put_i8(clamp(yaw));
        b.put_i8(clamp(gaz));
        // Unused compass heading
        b.put_f32_le(0.0);
        Packet::new(project::ARDRONE3, ardrone3_class::PILOTING, piloting::PCMD, b.freeze())
    }

    /// Fly autonomously to a GPS position, keeping the current heading
    pub fn move_to(latitude: f64, longitude: f64, altitude: f64) -> Packet {
        let mut b = BytesMut::with_capacity(32);
        b.put_f64_le(latitude);
        b.put_f64_le(longitude);
        b.put_f64_le(altitude);
        // Orientation mode NONE, heading unused
        b.put_u32_le(0);
        b.put_f32_le(0.0);
        Packet::new(project::ARDRONE3, ardrone3_class::PILOTING, piloting::MOVE_TO, b.freeze())
    }

    pub fn cancel_move_to() -> Packet {
        Packet::bare(project::ARDRONE3, ardrone3_class::PILOTING, piloting::CANCEL_MOVE_TO)
    }

    pub fn take_picture() -> Packet {
        Packet::bare(project::ARDRONE3, ardrone3_class::MEDIA_RECORD, 2)
    }

    pub fn set_video_streaming(enabled: bool) -> Packet {
        Packet::new(project::ARDRONE3, ardrone3_class::MEDIA_STREAMING, 0, flag(enabled))
    }
}
