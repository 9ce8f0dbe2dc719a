//! Bridge establishment.
//!
//! Before any call is trusted, both processes exchange a [`Hello`] carrying
//! their [`HandshakeDescriptor`] and claimed [`Role`]. The descriptors must
//! match field for field and the roles must be opposite; the first mismatch
//! fails the bridge with a fatal, non-retryable error. There is no partial
//! compatibility — bumping `protocol_version` is the only way to signal a
//! breaking contract change.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::control::{ControlError, ControlPayload};
use crate::error::TransportError;
use crate::frame::{Frame, FrameKind, CONTROL_STREAM_ID};
use crate::transport::StreamTransport;

/// Which end of the bridge a process is.
///
/// The role also partitions dynamic stream IDs (the plugin allocates even,
/// the host odd), so two processes claiming the same role would collide and
/// are rejected during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// The consumer process holding client stubs.
    Host,
    /// The spawned process serving implementations.
    Plugin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Host => write!(f, "host"),
            Role::Plugin => write!(f, "plugin"),
        }
    }
}

/// The fixed identity tuple both sides must present identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeDescriptor {
    pub protocol_version: u32,
    pub magic_key: String,
    pub magic_value: String,
}

impl HandshakeDescriptor {
    pub fn new(
        protocol_version: u32,
        magic_key: impl Into<String>,
        magic_value: impl Into<String>,
    ) -> Self {
        Self {
            protocol_version,
            magic_key: magic_key.into(),
            magic_value: magic_value.into(),
        }
    }
}

/// The first control payload each side sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub protocol_version: u32,
    pub magic_key: String,
    pub magic_value: String,
    pub role: Role,
}

impl Hello {
    pub fn new(descriptor: &HandshakeDescriptor, role: Role) -> Self {
        Self {
            protocol_version: descriptor.protocol_version,
            magic_key: descriptor.magic_key.clone(),
            magic_value: descriptor.magic_value.clone(),
            role,
        }
    }
}

/// Fatal handshake failures.
///
/// The magic value is a shared secret; mismatch errors never echo it.
#[derive(Debug)]
pub enum HandshakeError {
    VersionMismatch { local: u32, peer: u32 },
    KeyMismatch { local: String, peer: String },
    ValueMismatch,
    RoleConflict { role: Role },
    /// The peer refused our hello.
    Rejected { message: String },
    /// The peer sent something other than a hello.
    Protocol(String),
    Control(ControlError),
    Transport(TransportError),
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VersionMismatch { local, peer } => {
                write!(f, "protocol version mismatch: local {local}, peer {peer}")
            }
            Self::KeyMismatch { local, peer } => {
                write!(f, "magic key mismatch: local {local:?}, peer {peer:?}")
            }
            Self::ValueMismatch => write!(f, "magic value mismatch"),
            Self::RoleConflict { role } => {
                write!(f, "both sides claim the {role} role")
            }
            Self::Rejected { message } => write!(f, "peer rejected handshake: {message}"),
            Self::Protocol(msg) => write!(f, "handshake protocol error: {msg}"),
            Self::Control(e) => write!(f, "handshake control error: {e}"),
            Self::Transport(e) => write!(f, "handshake transport error: {e}"),
        }
    }
}

impl std::error::Error for HandshakeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Control(e) => Some(e),
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ControlError> for HandshakeError {
    fn from(e: ControlError) -> Self {
        Self::Control(e)
    }
}

impl From<TransportError> for HandshakeError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

/// Run the handshake on a fresh transport.
///
/// Sends our hello, reads the peer's, and compares. On mismatch a reject is
/// sent best-effort, the transport is closed and the error returned; the
/// transport must not be used further. Must run before the broker demux
/// starts, since it reads frames directly.
pub async fn exchange(
    transport: &StreamTransport,
    descriptor: &HandshakeDescriptor,
    role: Role,
) -> Result<(), HandshakeError> {
    let hello = ControlPayload::Hello(Hello::new(descriptor, role));
    transport.send_frame(Frame::control(hello.encode()?)).await?;

    let frame = transport.recv_frame().await?;
    if frame.kind != FrameKind::Control || frame.stream_id != CONTROL_STREAM_ID {
        let err = HandshakeError::Protocol(format!(
            "expected a control frame, got {} on stream {}",
            frame.kind, frame.stream_id
        ));
        reject_and_close(transport, &err).await;
        return Err(err);
    }

    let peer = match ControlPayload::decode(&frame.payload) {
        Ok(ControlPayload::Hello(peer)) => peer,
        Ok(ControlPayload::Reject { message }) => {
            transport.close();
            return Err(HandshakeError::Rejected { message });
        }
        Ok(other) => {
            let err = HandshakeError::Protocol(format!(
                "expected a hello, got {other:?}"
            ));
            reject_and_close(transport, &err).await;
            return Err(err);
        }
        Err(e) => {
            let err = HandshakeError::Control(e);
            reject_and_close(transport, &err).await;
            return Err(err);
        }
    };

    if let Err(err) = verify(descriptor, role, &peer) {
        tracing::error!(%err, "handshake failed");
        reject_and_close(transport, &err).await;
        return Err(err);
    }

    tracing::debug!(
        protocol_version = descriptor.protocol_version,
        %role,
        "handshake complete"
    );
    Ok(())
}

/// Field-by-field equality check, in deterministic order.
fn verify(
    descriptor: &HandshakeDescriptor,
    role: Role,
    peer: &Hello,
) -> Result<(), HandshakeError> {
    if peer.protocol_version != descriptor.protocol_version {
        return Err(HandshakeError::VersionMismatch {
            local: descriptor.protocol_version,
            peer: peer.protocol_version,
        });
    }
    if peer.magic_key != descriptor.magic_key {
        return Err(HandshakeError::KeyMismatch {
            local: descriptor.magic_key.clone(),
            peer: peer.magic_key.clone(),
        });
    }
    if peer.magic_value != descriptor.magic_value {
        return Err(HandshakeError::ValueMismatch);
    }
    if peer.role == role {
        return Err(HandshakeError::RoleConflict { role });
    }
    Ok(())
}

async fn reject_and_close(transport: &StreamTransport, err: &HandshakeError) {
    let reject = ControlPayload::Reject {
        message: err.to_string(),
    };
    if let Ok(bytes) = reject.encode() {
        let _ = transport.send_frame(Frame::control(bytes)).await;
    }
    transport.close();
}
