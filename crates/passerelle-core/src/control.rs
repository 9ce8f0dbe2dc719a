//! Control payloads for stream 0.
//!
//! Control frames coordinate the bridge itself: the initial hello exchange
//! and the open/accept/close verbs the broker uses to wire logical streams.
//! Payloads are postcard-encoded and validated both before encoding and
//! after decoding.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::handshake::Hello;

/// Maximum magic key length in a hello.
pub const MAX_MAGIC_KEY_LEN: usize = 256;

/// Maximum magic value length in a hello.
pub const MAX_MAGIC_VALUE_LEN: usize = 256;

/// Maximum reject message length.
pub const MAX_REJECT_MESSAGE_LEN: usize = 1024;

/// Control payload for stream 0 frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlPayload {
    /// First frame each side sends: its handshake identity.
    Hello(Hello),

    /// Handshake refusal; the sender closes the transport afterwards.
    Reject { message: String },

    /// Dial request for a logical stream.
    Open { stream_id: u32 },

    /// A published service accepted the dial on `stream_id`.
    Accept { stream_id: u32 },

    /// A logical stream is gone; in-flight calls on it fail.
    Close { stream_id: u32, reason: CloseReason },
}

/// Reason carried on a stream close.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloseReason {
    /// Normal closure.
    Normal = 0,
    /// The dialing side gave up waiting.
    Aborted = 1,
    /// Protocol violation detected on the stream.
    ProtocolViolation = 2,
}

impl CloseReason {
    pub fn from_u8(val: u8) -> Option<Self> {
        Some(match val {
            0 => CloseReason::Normal,
            1 => CloseReason::Aborted,
            2 => CloseReason::ProtocolViolation,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn description(self) -> &'static str {
        match self {
            CloseReason::Normal => "normal closure",
            CloseReason::Aborted => "aborted",
            CloseReason::ProtocolViolation => "protocol violation",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Error type for control payload operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    MagicKeyTooLong { len: usize, max: usize },
    MagicValueTooLong { len: usize, max: usize },
    RejectMessageTooLong { len: usize, max: usize },
    EncodingError(String),
    DecodingError(String),
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlError::MagicKeyTooLong { len, max } => {
                write!(f, "magic key too long: {len} bytes (max {max})")
            }
            ControlError::MagicValueTooLong { len, max } => {
                write!(f, "magic value too long: {len} bytes (max {max})")
            }
            ControlError::RejectMessageTooLong { len, max } => {
                write!(f, "reject message too long: {len} bytes (max {max})")
            }
            ControlError::EncodingError(msg) => write!(f, "encoding error: {msg}"),
            ControlError::DecodingError(msg) => write!(f, "decoding error: {msg}"),
        }
    }
}

impl std::error::Error for ControlError {}

impl ControlPayload {
    /// Encode this control payload to bytes using postcard.
    pub fn encode(&self) -> Result<Vec<u8>, ControlError> {
        self.validate()?;

        postcard::to_allocvec(self).map_err(|e| ControlError::EncodingError(e.to_string()))
    }

    /// Decode a control payload from bytes using postcard.
    pub fn decode(buf: &[u8]) -> Result<Self, ControlError> {
        let payload: Self =
            postcard::from_bytes(buf).map_err(|e| ControlError::DecodingError(e.to_string()))?;

        payload.validate()?;

        Ok(payload)
    }

    /// Validate this control payload against length limits.
    pub fn validate(&self) -> Result<(), ControlError> {
        match self {
            ControlPayload::Hello(hello) => {
                if hello.magic_key.len() > MAX_MAGIC_KEY_LEN {
                    return Err(ControlError::MagicKeyTooLong {
                        len: hello.magic_key.len(),
                        max: MAX_MAGIC_KEY_LEN,
                    });
                }
                if hello.magic_value.len() > MAX_MAGIC_VALUE_LEN {
                    return Err(ControlError::MagicValueTooLong {
                        len: hello.magic_value.len(),
                        max: MAX_MAGIC_VALUE_LEN,
                    });
                }
                Ok(())
            }
            ControlPayload::Reject { message } => {
                if message.len() > MAX_REJECT_MESSAGE_LEN {
                    return Err(ControlError::RejectMessageTooLong {
                        len: message.len(),
                        max: MAX_REJECT_MESSAGE_LEN,
                    });
                }
                Ok(())
            }
            // Open/Accept/Close carry only fixed-width fields
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::{HandshakeDescriptor, Role};

    fn hello() -> Hello {
        Hello::new(
            &HandshakeDescriptor::new(1, "PASSERELLE_PLUGIN", "0F9D"),
            Role::Host,
        )
    }

    #[test]
    fn close_reason_roundtrip() {
        let reasons = [
            CloseReason::Normal,
            CloseReason::Aborted,
            CloseReason::ProtocolViolation,
        ];

        for &reason in &reasons {
            let val = reason.as_u8();
            let roundtrip = CloseReason::from_u8(val).unwrap();
            assert_eq!(reason, roundtrip);
        }
        assert_eq!(CloseReason::from_u8(3), None);
    }

    #[test]
    fn close_reason_wire_values() {
        assert_eq!(CloseReason::Normal as u8, 0);
        assert_eq!(CloseReason::Aborted as u8, 1);
        assert_eq!(CloseReason::ProtocolViolation as u8, 2);
    }

    #[test]
    fn close_reason_display() {
        assert_eq!(format!("{}", CloseReason::Normal), "normal closure");
        assert_eq!(format!("{}", CloseReason::Aborted), "aborted");
        assert_eq!(
            format!("{}", CloseReason::ProtocolViolation),
            "protocol violation"
        );
    }

    #[test]
    fn payload_roundtrip() {
        let payloads = [
            ControlPayload::Hello(hello()),
            ControlPayload::Reject {
                message: "incompatible".to_string(),
            },
            ControlPayload::Open { stream_id: 7 },
            ControlPayload::Accept { stream_id: 7 },
            ControlPayload::Close {
                stream_id: 7,
                reason: CloseReason::Normal,
            },
        ];

        for payload in &payloads {
            let bytes = payload.encode().unwrap();
            let roundtrip = ControlPayload::decode(&bytes).unwrap();
            assert_eq!(*payload, roundtrip);
        }
    }

    #[test]
    fn oversized_magic_key_rejected() {
        let mut h = hello();
        h.magic_key = "k".repeat(MAX_MAGIC_KEY_LEN + 1);
        let err = ControlPayload::Hello(h).encode().unwrap_err();
        assert!(matches!(err, ControlError::MagicKeyTooLong { .. }));
    }

    #[test]
    fn oversized_magic_value_rejected() {
        let mut h = hello();
        h.magic_value = "v".repeat(MAX_MAGIC_VALUE_LEN + 1);
        let err = ControlPayload::Hello(h).encode().unwrap_err();
        assert!(matches!(err, ControlError::MagicValueTooLong { .. }));
    }

    #[test]
    fn oversized_reject_message_rejected_on_decode() {
        // Bypass encode-side validation by serializing directly.
        let payload = ControlPayload::Reject {
            message: "m".repeat(MAX_REJECT_MESSAGE_LEN + 1),
        };
        let bytes = postcard::to_allocvec(&payload).unwrap();
        let err = ControlPayload::decode(&bytes).unwrap_err();
        assert!(matches!(err, ControlError::RejectMessageTooLong { .. }));
    }

    #[test]
    fn garbage_bytes_fail_decode() {
        let err = ControlPayload::decode(&[0xFF, 0xFF, 0xFF]).unwrap_err();
        assert!(matches!(err, ControlError::DecodingError(_)));
    }
}
