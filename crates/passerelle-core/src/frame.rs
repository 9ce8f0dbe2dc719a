//! Wire frames.
//!
//! Every frame travels as a little-endian length prefix followed by a fixed
//! header and the payload:
//!
//! ```text
//! [len: u32][stream_id: u32][msg_id: u64][kind: u8][payload...]
//! ```
//!
//! `len` covers the header and payload, not the prefix itself.

use core::fmt;

use bytes::Bytes;

/// Stream 0 carries handshake and broker control payloads.
pub const CONTROL_STREAM_ID: u32 = 0;

/// Stream 1 is the well-known stream the serving side publishes at startup.
pub const PRIMARY_STREAM_ID: u32 = 1;

/// Fixed header size in bytes: stream_id + msg_id + kind.
pub const HEADER_SIZE: usize = 4 + 8 + 1;

/// Upper bound on `len`; oversized frames are rejected on both sides.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// What a frame carries.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// A call envelope addressed to the service on `stream_id`.
    Call = 0,
    /// A reply envelope matched to a call by `msg_id`.
    Reply = 1,
    /// A control payload; always on stream 0 with `msg_id` 0.
    Control = 2,
}

impl FrameKind {
    pub fn from_u8(val: u8) -> Option<Self> {
        Some(match val {
            0 => FrameKind::Call,
            1 => FrameKind::Reply,
            2 => FrameKind::Control,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameKind::Call => write!(f, "call"),
            FrameKind::Reply => write!(f, "reply"),
            FrameKind::Control => write!(f, "control"),
        }
    }
}

/// One multiplexed frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub stream_id: u32,
    pub msg_id: u64,
    pub kind: FrameKind,
    pub payload: Bytes,
}

impl Frame {
    pub fn call(stream_id: u32, msg_id: u64, payload: Vec<u8>) -> Self {
        Self {
            stream_id,
            msg_id,
            kind: FrameKind::Call,
            payload: Bytes::from(payload),
        }
    }

    pub fn reply(stream_id: u32, msg_id: u64, payload: Vec<u8>) -> Self {
        Self {
            stream_id,
            msg_id,
            kind: FrameKind::Reply,
            payload: Bytes::from(payload),
        }
    }

    pub fn control(payload: Vec<u8>) -> Self {
        Self {
            stream_id: CONTROL_STREAM_ID,
            msg_id: 0,
            kind: FrameKind::Control,
            payload: Bytes::from(payload),
        }
    }

    /// Serialize the fixed header.
    pub fn header_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.stream_id.to_le_bytes());
        buf[4..12].copy_from_slice(&self.msg_id.to_le_bytes());
        buf[12] = self.kind.as_u8();
        buf
    }

    /// Parse the fixed header; the payload is read separately.
    pub fn parse_header(buf: &[u8; HEADER_SIZE]) -> Result<(u32, u64, FrameKind), FrameError> {
        let stream_id = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let msg_id = u64::from_le_bytes([
            buf[4], buf[5], buf[6], buf[7], buf[8], buf[9], buf[10], buf[11],
        ]);
        let kind = FrameKind::from_u8(buf[12]).ok_or(FrameError::UnknownKind(buf[12]))?;
        Ok((stream_id, msg_id, kind))
    }
}

/// Frame-level wire violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// `len` smaller than the fixed header.
    TooShort { len: usize },
    /// `len` above [`MAX_FRAME_SIZE`].
    TooLarge { len: usize, max: usize },
    /// Unrecognized kind byte.
    UnknownKind(u8),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::TooShort { len } => {
                write!(f, "frame too small: {len} bytes (header is {HEADER_SIZE})")
            }
            FrameError::TooLarge { len, max } => {
                write!(f, "frame too large: {len} bytes (max {max})")
            }
            FrameError::UnknownKind(val) => write!(f, "unknown frame kind: {val}"),
        }
    }
}

impl std::error::Error for FrameError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_roundtrip() {
        for kind in [FrameKind::Call, FrameKind::Reply, FrameKind::Control] {
            assert_eq!(FrameKind::from_u8(kind.as_u8()), Some(kind));
        }
        assert_eq!(FrameKind::from_u8(3), None);
        assert_eq!(FrameKind::from_u8(255), None);
    }

    #[test]
    fn header_roundtrip() {
        let frame = Frame::call(42, 0xDEAD_BEEF_CAFE, vec![1, 2, 3]);
        let bytes = frame.header_bytes();
        let (stream_id, msg_id, kind) = Frame::parse_header(&bytes).unwrap();
        assert_eq!(stream_id, 42);
        assert_eq!(msg_id, 0xDEAD_BEEF_CAFE);
        assert_eq!(kind, FrameKind::Call);
    }

    #[test]
    fn parse_header_rejects_unknown_kind() {
        let mut bytes = Frame::control(Vec::new()).header_bytes();
        bytes[12] = 9;
        assert_eq!(Frame::parse_header(&bytes), Err(FrameError::UnknownKind(9)));
    }

    #[test]
    fn control_frames_live_on_stream_zero() {
        let frame = Frame::control(vec![7]);
        assert_eq!(frame.stream_id, CONTROL_STREAM_ID);
        assert_eq!(frame.msg_id, 0);
        assert_eq!(frame.kind, FrameKind::Control);
    }
}
