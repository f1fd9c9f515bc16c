//! Reassembly of video frames from stream fragments
//!
//! Each low-latency frame on the video buffer carries one fragment:
//! ```text
//! [ 2 bytes: frame number (u16, little-endian) ][ 1 byte: flags ][ 1 byte: fragment number ][ 1 byte: fragments per frame ][ data ]
//! ```
//! A frame is complete once every fragment of its frame number arrived. A
//! fragment of a newer frame discards the partial older one.

use bytes::{Buf, Bytes, BytesMut};
use skyfleet_shared::codec::CodecError;

pub const FRAGMENT_HEADER_LEN: usize = 5;

/// Flag bit set on frames that can be decoded on their own
pub const FLAG_FLUSH_FRAME: u8 = 0x01;

#[derive(Debug, Default)]
pub struct VideoAssembler {
    frame_number: Option<u16>,
    fragments: Vec<Option<Bytes>>,
    received: usize,
    last_frame: Option<Bytes>,
}

impl VideoAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment; returns the frame it completed, if any
    pub fn push(&mut self, mut payload: Bytes) -> Result<Option<Bytes>, CodecError> {
        if payload.len() < FRAGMENT_HEADER_LEN {
            return Err(CodecError::NotEnoughData {
                needed: FRAGMENT_HEADER_LEN,
                available: payload.len(),
            });
        }
        let frame_number = payload.get_u16_le();
        let _flags = payload.get_u8();
        let index = payload.get_u8() as usize;
        let count = payload.get_u8() as usize;
        if count == 0 || index >= count {
            return Err(CodecError::InvalidPayload(format!(
                "fragment {index} of {count}"
            )));
        }

        if self.frame_number != Some(frame_number) || self.fragments.len() != count {
            self.frame_number = Some(frame_number);
            self.fragments = vec![None; count];
            self.received = 0;
        }

        if self.fragments[index].is_none() {
            self.fragments[index] = Some(payload);
            self.received += 1;
        }

        if self.received < count {
            return Ok(None);
        }

        let mut frame = BytesMut::new();
        for fragment in self.fragments.drain(..).flatten() {
            frame.extend_from_slice(&fragment);
        }
        self.frame_number = None;
        self.received = 0;
        let frame = frame.freeze();
        self.last_frame = Some(frame.clone());
        Ok(Some(frame))
    }

    /// Most recent complete frame
    pub fn last_frame(&self) -> Option<&Bytes> {
        self.last_frame.as_ref()
    }
}

/// Build a fragment, as sent by the drone
pub fn fragment(frame_number: u16, index: u8, count: u8, data: &[u8]) -> Bytes {
    let mut b = BytesMut::with_capacity(FRAGMENT_HEADER_LEN + data.len());
    b.extend_from_slice(&frame_number.to_le_bytes());
    b.extend_from_slice(&[FLAG_FLUSH_FRAME, index, count]);
    b.extend_from_slice(data);
    b.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_order_fragments_complete_frame() {
        let mut video = VideoAssembler::new();
        assert_eq!(video.push(fragment(7, 1, 2, b"world")).unwrap(), None);
        let frame = video.push(fragment(7, 0, 2, b"hello ")).unwrap().unwrap();
        assert_eq!(&frame[..], b"hello world");
        assert_eq!(video.last_frame().unwrap(), &frame);
    }

    #[test]
    fn test_newer_frame_drops_partial_one() {
        let mut video = VideoAssembler::new();
        video.push(fragment(1, 0, 2, b"stale")).unwrap();
        assert_eq!(
            &video.push(fragment(2, 0, 1, b"fresh")).unwrap().unwrap()[..],
            b"fresh"
        );
        // The missing half of frame 1 no longer completes anything
        assert_eq!(video.push(fragment(1, 1, 2, b"late")).unwrap(), None);
        assert_eq!(&video.last_frame().unwrap()[..], b"fresh");
    }

    #[test]
    fn test_duplicate_fragment_is_ignored() {
        let mut video = VideoAssembler::new();
        video.push(fragment(3, 0, 2, b"a")).unwrap();
        assert_eq!(video.push(fragment(3, 0, 2, b"a")).unwrap(), None);
    }

    #[test]
    fn test_bad_fragment_header() {
        let mut video = VideoAssembler::new();
        assert!(video.push(Bytes::from_static(&[1, 0])).is_err());
        assert!(video.push(fragment(1, 3, 2, b"x")).is_err());
    }
}
