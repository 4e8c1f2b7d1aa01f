//! Frame wire format.
//!
//! ```text
//! offset  size  field
//! 0       2     magic "SB" (0x53 0x42)
//! 2       4     payload length, little endian
//! 6       n     payload: one encoded message
//! ```

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

pub const HEADER_SIZE: usize = 6;

pub const MAGIC: [u8; 2] = *b"SB";

/// 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// One encoded message as carried on a stream link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Bytes,
}

impl Frame {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Header plus payload.
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// The fixed 6-byte prefix of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub payload_len: u32,
}

impl FrameHeader {
    /// Parse the prefix of `src`; `None` until six bytes are available.
    pub fn parse(src: &[u8]) -> Result<Option<Self>> {
        let Some(prefix) = src.get(..HEADER_SIZE) else {
            return Ok(None);
        };
        let found = [prefix[0], prefix[1]];
        if found != MAGIC {
            return Err(FrameError::InvalidMagic { found });
        }
        let payload_len = u32::from_le_bytes([prefix[2], prefix[3], prefix[4], prefix[5]]);
        Ok(Some(Self { payload_len }))
    }

    /// Header for a payload of `len` bytes, refused above `max`.
    pub fn for_payload(len: usize, max: usize) -> Result<Self> {
        let max = max.min(u32::MAX as usize);
        if len > max {
            return Err(FrameError::PayloadTooLarge { size: len, max });
        }
        Ok(Self {
            payload_len: len as u32,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let len = self.payload_len.to_le_bytes();
        [MAGIC[0], MAGIC[1], len[0], len[1], len[2], len[3]]
    }

    pub fn write(&self, dst: &mut BytesMut) {
        dst.put_slice(&self.to_bytes());
    }

    /// Reject lengths above `max` before any payload is buffered.
    pub fn check(&self, max: usize) -> Result<usize> {
        let size = self.payload_len as usize;
        if size > max {
            return Err(FrameError::PayloadTooLarge { size, max });
        }
        Ok(size)
    }
}

/// Append `payload` as one frame to `dst`.
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let header = FrameHeader::for_payload(payload.len(), u32::MAX as usize)?;
    dst.reserve(HEADER_SIZE + payload.len());
    header.write(dst);
    dst.put_slice(payload);
    Ok(())
}

/// Take one complete frame off the front of `src`.
///
/// Returns `Ok(None)` and leaves `src` untouched while the frame is still
/// incomplete.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    let Some(header) = FrameHeader::parse(src)? else {
        return Ok(None);
    };
    let payload_len = header.check(max_payload)?;

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    Ok(Some(Frame::new(src.split_to(payload_len).freeze())))
}

/// Limits applied by [`FrameReader`](crate::FrameReader) and
/// [`FrameWriter`](crate::FrameWriter).
#[derive(Debug, Clone)]
pub struct FrameConfig {
    pub max_payload_size: usize,
    /// Applied to the link when the reader is built from one.
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(payloads: &[&[u8]]) -> BytesMut {
        let mut buf = BytesMut::new();
        for payload in payloads {
            encode_frame(payload, &mut buf).expect("payload should encode");
        }
        buf
    }

    #[test]
    fn header_layout_is_magic_then_le_length() {
        let buf = wire(&[b"abc"]);
        assert_eq!(&buf[..HEADER_SIZE], &[0x53, 0x42, 3, 0, 0, 0]);
        assert_eq!(&buf[HEADER_SIZE..], b"abc");
    }

    #[test]
    fn frames_come_out_one_at_a_time() {
        let mut buf = wire(&[b"first", b"", b"third"]);
        let mut seen = Vec::new();
        while let Some(frame) = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).expect("frame should decode") {
            seen.push(frame.payload);
        }
        assert_eq!(seen, vec![Bytes::from_static(b"first"), Bytes::new(), Bytes::from_static(b"third")]);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frames_are_left_in_place() {
        let full = wire(&[b"partial payload"]);
        for cut in [0, 3, HEADER_SIZE, full.len() - 1] {
            let mut buf = BytesMut::from(&full[..cut]);
            assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
                .expect("partial frame is not an error")
                .is_none());
            assert_eq!(buf.len(), cut);
        }
    }

    #[test]
    fn wrong_magic_reports_what_was_found() {
        let mut buf = BytesMut::from(&b"IP\x00\x00\x00\x00"[..]);
        match decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD) {
            Err(FrameError::InvalidMagic { found }) => assert_eq!(&found, b"IP"),
            other => panic!("expected invalid magic, got {other:?}"),
        }
    }

    #[test]
    fn oversized_length_rejected_from_header_alone() {
        let mut buf = BytesMut::new();
        FrameHeader { payload_len: 4096 }.write(&mut buf);
        assert!(matches!(
            decode_frame(&mut buf, 1024),
            Err(FrameError::PayloadTooLarge { size: 4096, max: 1024 })
        ));
    }

    #[test]
    fn header_bytes_parse_back() {
        let header = FrameHeader::for_payload(0x0102_0304, usize::MAX).expect("length fits u32");
        assert_eq!(header.to_bytes(), [0x53, 0x42, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(FrameHeader::parse(&header.to_bytes()).expect("header should parse"), Some(header));
        assert!(matches!(
            FrameHeader::for_payload(9, 8),
            Err(FrameError::PayloadTooLarge { size: 9, max: 8 })
        ));
    }

    #[test]
    fn wire_size_counts_header() {
        assert_eq!(Frame::new(Bytes::from_static(b"test")).wire_size(), HEADER_SIZE + 4);
    }
}
