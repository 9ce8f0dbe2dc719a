//! Error types, split into the two classes the bridge distinguishes:
//! transport failures (the call never completed) and application errors
//! (a fully delivered reply carrying a business failure).

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::control::ControlError;
use crate::envelope::EnvelopeError;
use crate::frame::FrameError;

/// Transport-level errors. A call that fails with one of these never
/// produced a business-level result on the peer.
#[derive(Debug)]
pub enum TransportError {
    Closed,
    Io(std::io::Error),
    Frame(FrameError),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "transport closed"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Frame(e) => write!(f, "frame error: {e}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Frame(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<FrameError> for TransportError {
    fn from(e: FrameError) -> Self {
        Self::Frame(e)
    }
}

/// A business error produced by the remote implementation and delivered
/// inside an otherwise successful reply.
///
/// Application errors travel in-band in the reply envelope, so they survive
/// the process boundary with their message intact. They are recoverable from
/// the caller's perspective; whether to retry is the caller's decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationError {
    pub message: String,
}

impl ApplicationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApplicationError {}

impl From<String> for ApplicationError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for ApplicationError {
    fn from(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// High-level call errors.
///
/// Every variant except [`RpcError::Application`] is transport-class: the
/// call aborted and the peer may never have seen it. `Application` means the
/// reply arrived and carried a business failure.
#[derive(Debug)]
pub enum RpcError {
    Transport(TransportError),
    /// The logical stream carrying the call was closed.
    StreamClosed { stream_id: u32 },
    /// No peer accepted the dial within the configured window.
    DialTimeout { stream_id: u32 },
    Envelope(EnvelopeError),
    Control(ControlError),
    Application(ApplicationError),
}

impl RpcError {
    /// True for every failure class that aborted the call in flight.
    pub fn is_transport(&self) -> bool {
        !matches!(self, Self::Application(_))
    }

    /// True when the reply was delivered but carried a business error.
    pub fn is_application(&self) -> bool {
        matches!(self, Self::Application(_))
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::StreamClosed { stream_id } => write!(f, "stream {stream_id} closed"),
            Self::DialTimeout { stream_id } => {
                write!(f, "dial timed out waiting for stream {stream_id}")
            }
            Self::Envelope(e) => write!(f, "envelope error: {e}"),
            Self::Control(e) => write!(f, "control error: {e}"),
            Self::Application(e) => write!(f, "application error: {e}"),
        }
    }
}

impl std::error::Error for RpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Envelope(e) => Some(e),
            Self::Control(e) => Some(e),
            Self::Application(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for RpcError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<EnvelopeError> for RpcError {
    fn from(e: EnvelopeError) -> Self {
        Self::Envelope(e)
    }
}

impl From<ControlError> for RpcError {
    fn from(e: ControlError) -> Self {
        Self::Control(e)
    }
}

impl From<ApplicationError> for RpcError {
    fn from(e: ApplicationError) -> Self {
        Self::Application(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classes_are_disjoint() {
        let transport = RpcError::Transport(TransportError::Closed);
        assert!(transport.is_transport());
        assert!(!transport.is_application());

        let closed = RpcError::StreamClosed { stream_id: 7 };
        assert!(closed.is_transport());

        let timeout = RpcError::DialTimeout { stream_id: 9 };
        assert!(timeout.is_transport());

        let app = RpcError::Application(ApplicationError::new("config not yet available"));
        assert!(app.is_application());
        assert!(!app.is_transport());
    }

    #[test]
    fn application_error_display_is_bare_message() {
        let e = ApplicationError::new("submit rejected");
        assert_eq!(e.to_string(), "submit rejected");
    }

    #[test]
    fn rpc_error_display() {
        let e = RpcError::StreamClosed { stream_id: 4 };
        assert_eq!(e.to_string(), "stream 4 closed");

        let e = RpcError::DialTimeout { stream_id: 6 };
        assert_eq!(e.to_string(), "dial timed out waiting for stream 6");
    }
}
