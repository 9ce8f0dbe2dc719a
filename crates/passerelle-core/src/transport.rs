//! Byte-stream transport.
//!
//! Wraps any `AsyncRead + AsyncWrite` duplex (TCP socket, unix socket,
//! in-process duplex pipe) and moves [`Frame`]s over it. The writer lock
//! serializes whole frames, so concurrent streams never interleave bytes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::TransportError;
use crate::frame::{Frame, FrameError, FrameKind, HEADER_SIZE, MAX_FRAME_SIZE};

#[derive(Clone)]
pub struct StreamTransport {
    inner: Arc<StreamInner>,
}

impl std::fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport").finish_non_exhaustive()
    }
}

struct StreamInner {
    reader: AsyncMutex<Box<dyn AsyncRead + Unpin + Send>>,
    writer: AsyncMutex<Box<dyn AsyncWrite + Unpin + Send>>,
    closed: AtomicBool,
}

impl StreamTransport {
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            inner: Arc::new(StreamInner {
                reader: AsyncMutex::new(Box::new(reader)),
                writer: AsyncMutex::new(Box::new(writer)),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Connected in-process pair, one transport per end.
    pub fn pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(65536);
        (Self::new(a), Self::new(b))
    }

    pub async fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let frame_len = HEADER_SIZE + frame.payload.len();
        if frame_len > MAX_FRAME_SIZE {
            return Err(TransportError::Frame(FrameError::TooLarge {
                len: frame_len,
                max: MAX_FRAME_SIZE,
            }));
        }
        let header = frame.header_bytes();

        let mut writer = self.inner.writer.lock().await;
        writer
            .write_all(&(frame_len as u32).to_le_bytes())
            .await
            .map_err(TransportError::Io)?;
        writer.write_all(&header).await.map_err(TransportError::Io)?;
        if !frame.payload.is_empty() {
            writer
                .write_all(&frame.payload)
                .await
                .map_err(TransportError::Io)?;
        }
        writer.flush().await.map_err(TransportError::Io)?;
        Ok(())
    }

    pub async fn recv_frame(&self) -> Result<Frame, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let mut reader = self.inner.reader.lock().await;

        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                TransportError::Closed
            } else {
                TransportError::Io(e)
            }
        })?;
        let frame_len = u32::from_le_bytes(len_buf) as usize;
        if frame_len < HEADER_SIZE {
            return Err(TransportError::Frame(FrameError::TooShort { len: frame_len }));
        }
        if frame_len > MAX_FRAME_SIZE {
            return Err(TransportError::Frame(FrameError::TooLarge {
                len: frame_len,
                max: MAX_FRAME_SIZE,
            }));
        }

        let mut header = [0u8; HEADER_SIZE];
        reader
            .read_exact(&mut header)
            .await
            .map_err(TransportError::Io)?;
        let (stream_id, msg_id, kind) =
            Frame::parse_header(&header).map_err(TransportError::Frame)?;

        let payload_len = frame_len - HEADER_SIZE;
        let payload = if payload_len > 0 {
            let mut buf = vec![0u8; payload_len];
            reader
                .read_exact(&mut buf)
                .await
                .map_err(TransportError::Io)?;
            Bytes::from(buf)
        } else {
            Bytes::new()
        };

        Ok(Frame {
            stream_id,
            msg_id,
            kind,
            payload,
        })
    }

    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    /// Close locally and shut down the write half so the peer sees EOF.
    pub async fn shutdown(&self) {
        self.close();
        let mut writer = self.inner.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_creation() {
        let (a, b) = StreamTransport::pair();
        assert!(!a.is_closed());
        assert!(!b.is_closed());
    }

    #[tokio::test]
    async fn send_recv_roundtrip() {
        let (a, b) = StreamTransport::pair();

        a.send_frame(Frame::call(5, 99, b"hello".to_vec()))
            .await
            .unwrap();

        let frame = b.recv_frame().await.unwrap();
        assert_eq!(frame.stream_id, 5);
        assert_eq!(frame.msg_id, 99);
        assert_eq!(frame.kind, FrameKind::Call);
        assert_eq!(&frame.payload[..], b"hello");
    }

    #[tokio::test]
    async fn empty_payload() {
        let (a, b) = StreamTransport::pair();

        a.send_frame(Frame::reply(3, 7, Vec::new())).await.unwrap();

        let frame = b.recv_frame().await.unwrap();
        assert_eq!(frame.kind, FrameKind::Reply);
        assert!(frame.payload.is_empty());
    }

    #[tokio::test]
    async fn bidirectional() {
        let (a, b) = StreamTransport::pair();

        a.send_frame(Frame::call(2, 1, b"ping".to_vec()))
            .await
            .unwrap();
        let got = b.recv_frame().await.unwrap();
        assert_eq!(&got.payload[..], b"ping");

        b.send_frame(Frame::reply(2, 1, b"pong".to_vec()))
            .await
            .unwrap();
        let got = a.recv_frame().await.unwrap();
        assert_eq!(&got.payload[..], b"pong");
    }

    #[tokio::test]
    async fn concurrent_send_recv() {
        let (a, b) = StreamTransport::pair();

        let sender = tokio::spawn(async move {
            for i in 0..100u64 {
                a.send_frame(Frame::call(9, i, i.to_le_bytes().to_vec()))
                    .await
                    .unwrap();
            }
        });

        for i in 0..100u64 {
            let frame = b.recv_frame().await.unwrap();
            assert_eq!(frame.msg_id, i);
        }
        sender.await.unwrap();
    }

    #[tokio::test]
    async fn close_rejects_io() {
        let (a, _b) = StreamTransport::pair();
        a.close();
        assert!(a.is_closed());
        assert!(matches!(
            a.send_frame(Frame::control(Vec::new())).await,
            Err(TransportError::Closed)
        ));
        assert!(matches!(a.recv_frame().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn peer_drop_surfaces_as_closed() {
        let (a, b) = StreamTransport::pair();
        drop(b);
        assert!(matches!(a.recv_frame().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn oversized_frame_rejected_on_send() {
        let (a, _b) = StreamTransport::pair();
        let res = a
            .send_frame(Frame::call(1, 1, vec![0u8; MAX_FRAME_SIZE]))
            .await;
        assert!(matches!(
            res,
            Err(TransportError::Frame(FrameError::TooLarge { .. }))
        ));
    }
}
