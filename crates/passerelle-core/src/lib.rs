//! passerelle-core: transport, handshake, and stream broker for the
//! host/plugin bridge.
//!
//! This crate defines:
//! - Wire frames and framing limits ([`Frame`], [`FrameKind`], [`MAX_FRAME_SIZE`])
//! - The length-prefixed byte-stream transport ([`StreamTransport`])
//! - Control payloads and close reasons ([`ControlPayload`], [`CloseReason`])
//! - The connection handshake ([`HandshakeDescriptor`], [`exchange`])
//! - Call and reply envelopes ([`CallEnvelope`], [`ReplyEnvelope`])
//! - The stream multiplexer ([`Broker`], [`StreamHandle`], [`StreamService`])
//! - Error types ([`TransportError`], [`ApplicationError`], [`RpcError`])

#![forbid(unsafe_code)]

mod broker;
mod control;
mod envelope;
mod error;
mod frame;
mod handshake;
mod transport;

pub use broker::*;
pub use control::*;
pub use envelope::*;
pub use error::*;
pub use frame::*;
pub use handshake::*;
pub use transport::*;
