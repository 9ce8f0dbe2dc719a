//! Call and reply envelopes.
//!
//! A call frame's payload is a [`CallEnvelope`]; the matching reply frame's
//! payload is a [`ReplyEnvelope`]. An application error rides inside the
//! reply envelope — it is a fully delivered result, not a transport failure.
//! Method argument and result values are postcard-encoded separately and
//! carried as opaque bytes, so the envelope layer never needs to know the
//! method's types.

use core::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ApplicationError;

/// Maximum method name length.
pub const MAX_METHOD_NAME_LEN: usize = 128;

/// Outbound half of one remote call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEnvelope {
    pub method: String,
    pub args: Vec<u8>,
}

impl CallEnvelope {
    pub fn new(method: impl Into<String>, args: Vec<u8>) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }
}

/// Inbound half of one remote call.
///
/// `error` and a non-empty `result` are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub result: Vec<u8>,
    pub error: Option<ApplicationError>,
}

impl ReplyEnvelope {
    pub fn ok(result: Vec<u8>) -> Self {
        Self {
            result,
            error: None,
        }
    }

    pub fn err(error: ApplicationError) -> Self {
        Self {
            result: Vec::new(),
            error: Some(error),
        }
    }
}

/// Error type for envelope operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    MethodEmpty,
    MethodTooLong { len: usize, max: usize },
    /// A reply claimed both a result and an error.
    ErrorWithResult,
    EncodingError(String),
    DecodingError(String),
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeError::MethodEmpty => write!(f, "method name is empty"),
            EnvelopeError::MethodTooLong { len, max } => {
                write!(f, "method name too long: {len} bytes (max {max})")
            }
            EnvelopeError::ErrorWithResult => {
                write!(f, "reply carries both a result and an error")
            }
            EnvelopeError::EncodingError(msg) => write!(f, "encoding error: {msg}"),
            EnvelopeError::DecodingError(msg) => write!(f, "decoding error: {msg}"),
        }
    }
}

impl std::error::Error for EnvelopeError {}

impl CallEnvelope {
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        self.validate()?;
        postcard::to_allocvec(self).map_err(|e| EnvelopeError::EncodingError(e.to_string()))
    }

    pub fn decode(buf: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: Self =
            postcard::from_bytes(buf).map_err(|e| EnvelopeError::DecodingError(e.to_string()))?;
        envelope.validate()?;
        Ok(envelope)
    }

    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.method.is_empty() {
            return Err(EnvelopeError::MethodEmpty);
        }
        if self.method.len() > MAX_METHOD_NAME_LEN {
            return Err(EnvelopeError::MethodTooLong {
                len: self.method.len(),
                max: MAX_METHOD_NAME_LEN,
            });
        }
        Ok(())
    }
}

impl ReplyEnvelope {
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        self.validate()?;
        postcard::to_allocvec(self).map_err(|e| EnvelopeError::EncodingError(e.to_string()))
    }

    pub fn decode(buf: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: Self =
            postcard::from_bytes(buf).map_err(|e| EnvelopeError::DecodingError(e.to_string()))?;
        envelope.validate()?;
        Ok(envelope)
    }

    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.error.is_some() && !self.result.is_empty() {
            return Err(EnvelopeError::ErrorWithResult);
        }
        Ok(())
    }
}

/// Postcard-encode one method argument or result value.
pub fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, EnvelopeError> {
    postcard::to_allocvec(value).map_err(|e| EnvelopeError::EncodingError(e.to_string()))
}

/// Postcard-decode one method argument or result value.
pub fn decode_value<T: DeserializeOwned>(buf: &[u8]) -> Result<T, EnvelopeError> {
    postcard::from_bytes(buf).map_err(|e| EnvelopeError::DecodingError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_roundtrip() {
        let call = CallEnvelope::new("Instance.Start", encode_value(&()).unwrap());
        let bytes = call.encode().unwrap();
        assert_eq!(CallEnvelope::decode(&bytes).unwrap(), call);
    }

    #[test]
    fn reply_roundtrip_ok() {
        let reply = ReplyEnvelope::ok(encode_value(&1337u64).unwrap());
        let bytes = reply.encode().unwrap();
        let back = ReplyEnvelope::decode(&bytes).unwrap();
        assert_eq!(back, reply);
        assert_eq!(decode_value::<u64>(&back.result).unwrap(), 1337);
    }

    #[test]
    fn reply_roundtrip_error() {
        let reply = ReplyEnvelope::err(ApplicationError::new("config not yet available"));
        let bytes = reply.encode().unwrap();
        let back = ReplyEnvelope::decode(&bytes).unwrap();
        assert_eq!(
            back.error.unwrap().message,
            "config not yet available"
        );
        assert!(back.result.is_empty());
    }

    #[test]
    fn empty_method_rejected() {
        let err = CallEnvelope::new("", Vec::new()).encode().unwrap_err();
        assert_eq!(err, EnvelopeError::MethodEmpty);
    }

    #[test]
    fn oversized_method_rejected() {
        let name = "M".repeat(MAX_METHOD_NAME_LEN + 1);
        let err = CallEnvelope::new(name, Vec::new()).encode().unwrap_err();
        assert!(matches!(err, EnvelopeError::MethodTooLong { .. }));
    }

    #[test]
    fn reply_with_error_and_result_rejected() {
        let reply = ReplyEnvelope {
            result: vec![1],
            error: Some(ApplicationError::new("boom")),
        };
        assert_eq!(reply.encode().unwrap_err(), EnvelopeError::ErrorWithResult);

        // And the same on the decode side, for a peer that skipped validation.
        let bytes = postcard::to_allocvec(&reply).unwrap();
        assert_eq!(
            ReplyEnvelope::decode(&bytes).unwrap_err(),
            EnvelopeError::ErrorWithResult
        );
    }

    #[test]
    fn garbage_bytes_fail_decode() {
        assert!(matches!(
            CallEnvelope::decode(&[0xFF, 0x00, 0x07]),
            Err(EnvelopeError::DecodingError(_))
        ));
    }
}
