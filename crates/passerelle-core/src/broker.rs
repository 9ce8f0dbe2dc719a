//! Stream multiplexer.
//!
//! The broker turns one [`StreamTransport`] into an unbounded set of logical
//! streams. The side that creates a sub-service calls [`Broker::allocate`]
//! for a fresh ID and [`Broker::publish`] to serve it; the other side calls
//! [`Broker::dial`] with the ID it received in a reply and gets a
//! [`StreamHandle`] for making calls.
//!
//! ```text
//!   StreamHandle::call ──┐                       ┌── serve_stream task (per
//!                        ▼                       ▼       published stream)
//!                 ┌─────────────────────────────────────┐
//!                 │ Broker                              │
//!                 │   pending:  msg_id -> reply waiter  │
//!                 │   services: stream -> call queue    │
//!                 │   dials:    stream -> accept waiter │
//!                 └─────────────────────────────────────┘
//!                        ▲
//!                        │ frames
//!                  Broker::run (demux)
//! ```
//!
//! # Key invariant
//!
//! Only [`Broker::run`] calls `transport.recv_frame()`. Everything else goes
//! through the tables above, so no two tasks ever compete for inbound frames.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::control::{CloseReason, ControlPayload};
use crate::envelope::{decode_value, encode_value, CallEnvelope, ReplyEnvelope};
use crate::error::{ApplicationError, RpcError, TransportError};
use crate::frame::{Frame, FrameKind};
use crate::handshake::Role;
use crate::transport::StreamTransport;

/// Broker tuning knobs.
#[derive(Debug, Clone)]
pub struct BrokerOptions {
    /// How long a dial waits for the peer's accept before failing.
    pub dial_timeout: Duration,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        let dial_timeout_ms: u64 = std::env::var("PASSERELLE_DIAL_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5_000);
        Self {
            dial_timeout: Duration::from_millis(dial_timeout_ms),
        }
    }
}

/// Boxed future returned by [`StreamService::call`].
pub type ServiceFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<u8>, ApplicationError>> + Send + 'a>>;

/// A server-side stub serving one published stream.
///
/// `args` is the caller's postcard-encoded argument value; the returned bytes
/// are the postcard-encoded result value. A returned `Err` travels to the
/// caller inside the reply envelope, never as a transport failure.
pub trait StreamService: Send + Sync + 'static {
    fn call<'a>(&'a self, method: &'a str, args: &'a [u8]) -> ServiceFuture<'a>;
}

struct PendingCall {
    stream_id: u32,
    tx: oneshot::Sender<Result<ReplyEnvelope, RpcError>>,
}

struct InboundCall {
    msg_id: u64,
    payload: bytes::Bytes,
}

struct ServiceEntry {
    calls: mpsc::UnboundedSender<InboundCall>,
    /// Present until the first dial arrives; the serve task waits on the
    /// other end before accepting.
    opened: Option<oneshot::Sender<()>>,
}

struct BrokerInner {
    transport: StreamTransport,
    role: Role,
    options: BrokerOptions,
    next_stream_id: AtomicU32,
    next_msg_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingCall>>,
    services: Mutex<HashMap<u32, ServiceEntry>>,
    dials: Mutex<HashMap<u32, oneshot::Sender<Result<(), RpcError>>>>,
    /// Dials that arrived before the matching publish.
    early_opens: Mutex<HashSet<u32>>,
    /// Streams that died; calls and dials on them fail fast.
    closed_streams: Mutex<HashSet<u32>>,
}

/// The stream multiplexer for one bridge end.
///
/// Cheap to clone; all clones share the same tables and transport.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("role", &self.inner.role)
            .finish_non_exhaustive()
    }
}

impl Broker {
    pub fn new(transport: StreamTransport, role: Role) -> Self {
        Self::with_options(transport, role, BrokerOptions::default())
    }

    pub fn with_options(transport: StreamTransport, role: Role, options: BrokerOptions) -> Self {
        // Stream 0 is control, stream 1 the well-known primary stream.
        // Dynamic IDs are split by parity so both sides can allocate without
        // coordination: plugin even, host odd.
        let first_stream_id = match role {
            Role::Plugin => 2,
            Role::Host => 3,
        };
        Self {
            inner: Arc::new(BrokerInner {
                transport,
                role,
                options,
                next_stream_id: AtomicU32::new(first_stream_id),
                next_msg_id: AtomicU64::new(1),
                pending: Mutex::new(HashMap::new()),
                services: Mutex::new(HashMap::new()),
                dials: Mutex::new(HashMap::new()),
                early_opens: Mutex::new(HashSet::new()),
                closed_streams: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Reserve the next stream ID for this side.
    ///
    /// IDs are strictly increasing and never reused for the lifetime of the
    /// underlying transport.
    pub fn allocate(&self) -> u32 {
        self.inner.next_stream_id.fetch_add(2, Ordering::Relaxed)
    }

    /// Serve `service` on `stream_id`.
    ///
    /// Returns immediately. A task is spawned that accepts exactly one
    /// incoming dial on the stream and then serves calls on it until the
    /// stream or the transport closes. A dial that arrived ahead of this
    /// publish is answered right away.
    pub fn publish(&self, stream_id: u32, service: Arc<dyn StreamService>) {
        let (calls_tx, calls_rx) = mpsc::unbounded_channel();
        let (opened_tx, opened_rx) = oneshot::channel();

        {
            let mut services = self.inner.services.lock();
            if services.contains_key(&stream_id) {
                tracing::warn!(stream_id, "publish: stream already published, ignoring");
                return;
            }
            let opened = if self.inner.early_opens.lock().remove(&stream_id) {
                let _ = opened_tx.send(());
                None
            } else {
                Some(opened_tx)
            };
            services.insert(
                stream_id,
                ServiceEntry {
                    calls: calls_tx,
                    opened,
                },
            );
        }

        tracing::debug!(stream_id, "publish: service registered");
        let broker = self.clone();
        tokio::spawn(serve_stream(broker, stream_id, service, opened_rx, calls_rx));
    }

    /// Dial a stream the peer has published (or is about to publish).
    ///
    /// Blocks until the peer's serve task accepts, or fails with
    /// [`RpcError::DialTimeout`] once the configured window elapses. The
    /// broker demux must be running.
    pub async fn dial(&self, stream_id: u32) -> Result<StreamHandle, RpcError> {
        let already_dead = self.inner.closed_streams.lock().contains(&stream_id);
        if already_dead {
            return Err(RpcError::StreamClosed { stream_id });
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut dials = self.inner.dials.lock();
            if dials.insert(stream_id, tx).is_some() {
                tracing::warn!(stream_id, "dial: replacing an earlier dial for this stream");
            }
        }

        if let Err(e) = self.send_control(ControlPayload::Open { stream_id }).await {
            self.inner.dials.lock().remove(&stream_id);
            return Err(e);
        }

        tracing::debug!(stream_id, "dial: waiting for accept");
        match tokio::time::timeout(self.inner.options.dial_timeout, rx).await {
            Ok(Ok(Ok(()))) => {
                tracing::debug!(stream_id, "dial: accepted");
                Ok(StreamHandle {
                    stream_id,
                    broker: self.clone(),
                    closed: AtomicBool::new(false),
                })
            }
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(RpcError::Transport(TransportError::Closed)),
            Err(_) => {
                self.inner.dials.lock().remove(&stream_id);
                // Unpark the peer in case it parked our open.
                let _ = self
                    .send_control(ControlPayload::Close {
                        stream_id,
                        reason: CloseReason::Aborted,
                    })
                    .await;
                Err(RpcError::DialTimeout { stream_id })
            }
        }
    }

    /// Tear down one logical stream, failing its in-flight calls.
    ///
    /// Sibling streams on the same transport are unaffected.
    pub async fn close_stream(&self, stream_id: u32, reason: CloseReason) {
        tracing::debug!(stream_id, %reason, "close_stream");
        self.retire_stream(stream_id);
        let _ = self
            .send_control(ControlPayload::Close { stream_id, reason })
            .await;
    }

    /// Demux loop. Runs until the transport closes; consumes this clone.
    ///
    /// Routes control payloads to the broker tables, replies to their
    /// pending calls by `msg_id`, and calls into the published stream's
    /// queue. On exit every pending call and dial fails with a transport
    /// error and the transport is shut down.
    pub async fn run(self) -> Result<(), TransportError> {
        tracing::debug!(role = %self.inner.role, "broker: starting demux loop");
        let result = loop {
            let frame = match self.inner.transport.recv_frame().await {
                Ok(frame) => frame,
                Err(TransportError::Closed) => {
                    tracing::debug!("broker: transport closed");
                    break Ok(());
                }
                Err(e) => {
                    tracing::error!(error = %e, "broker: transport error");
                    break Err(e);
                }
            };

            tracing::trace!(
                stream_id = frame.stream_id,
                msg_id = frame.msg_id,
                kind = %frame.kind,
                payload_len = frame.payload.len(),
                "broker: received frame"
            );

            match frame.kind {
                FrameKind::Control => self.handle_control(frame).await,
                FrameKind::Reply => self.handle_reply(frame),
                FrameKind::Call => self.handle_call(frame).await,
            }
        };
        self.shutdown();
        result
    }

    async fn handle_control(&self, frame: Frame) {
        let payload = match ControlPayload::decode(&frame.payload) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "broker: undecodable control payload, dropping");
                return;
            }
        };

        match payload {
            ControlPayload::Open { stream_id } => self.handle_open(stream_id).await,
            ControlPayload::Accept { stream_id } => {
                let waiter = self.inner.dials.lock().remove(&stream_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(Ok(()));
                    }
                    None => {
                        tracing::warn!(stream_id, "broker: unroutable accept (no dial waiting)")
                    }
                }
            }
            ControlPayload::Close { stream_id, reason } => {
                tracing::debug!(stream_id, %reason, "broker: peer closed stream");
                self.retire_stream(stream_id);
            }
            ControlPayload::Hello(_) | ControlPayload::Reject { .. } => {
                tracing::warn!("broker: unexpected handshake payload after establishment");
            }
        }
    }

    async fn handle_open(&self, stream_id: u32) {
        enum Outcome {
            Notified,
            ReAccept,
            Dead,
            Parked,
        }

        let outcome = {
            let mut services = self.inner.services.lock();
            match services.get_mut(&stream_id) {
                Some(entry) => match entry.opened.take() {
                    Some(tx) => {
                        let _ = tx.send(());
                        Outcome::Notified
                    }
                    None => Outcome::ReAccept,
                },
                None => {
                    if self.inner.closed_streams.lock().contains(&stream_id) {
                        Outcome::Dead
                    } else {
                        self.inner.early_opens.lock().insert(stream_id);
                        Outcome::Parked
                    }
                }
            }
        };

        match outcome {
            // The serve task sends the accept.
            Outcome::Notified => {}
            Outcome::ReAccept => {
                tracing::debug!(stream_id, "broker: duplicate open, re-accepting");
                if let Err(e) = self.send_control(ControlPayload::Accept { stream_id }).await {
                    tracing::warn!(stream_id, error = %e, "broker: failed to re-accept");
                }
            }
            Outcome::Dead => {
                let _ = self
                    .send_control(ControlPayload::Close {
                        stream_id,
                        reason: CloseReason::Normal,
                    })
                    .await;
            }
            Outcome::Parked => {
                tracing::debug!(stream_id, "broker: open parked until publish");
            }
        }
    }

    fn handle_reply(&self, frame: Frame) {
        let msg_id = frame.msg_id;
        let waiter = self.inner.pending.lock().remove(&msg_id);
        let Some(pending) = waiter else {
            tracing::warn!(
                stream_id = frame.stream_id,
                msg_id,
                "broker: unroutable reply (no pending call)"
            );
            return;
        };
        let result = ReplyEnvelope::decode(&frame.payload).map_err(RpcError::Envelope);
        let _ = pending.tx.send(result);
    }

    async fn handle_call(&self, frame: Frame) {
        let stream_id = frame.stream_id;
        let delivered = {
            let services = self.inner.services.lock();
            match services.get(&stream_id) {
                Some(entry) => entry
                    .calls
                    .send(InboundCall {
                        msg_id: frame.msg_id,
                        payload: frame.payload,
                    })
                    .is_ok(),
                None => false,
            }
        };
        if !delivered {
            tracing::debug!(
                stream_id,
                msg_id = frame.msg_id,
                "broker: call for unknown or closed stream"
            );
            let _ = self
                .send_control(ControlPayload::Close {
                    stream_id,
                    reason: CloseReason::Aborted,
                })
                .await;
        }
    }

    pub(crate) async fn call_raw(
        &self,
        stream_id: u32,
        method: &str,
        args: Vec<u8>,
    ) -> Result<Vec<u8>, RpcError> {
        let already_dead = self.inner.closed_streams.lock().contains(&stream_id);
        if already_dead {
            return Err(RpcError::StreamClosed { stream_id });
        }

        let payload = CallEnvelope::new(method, args).encode()?;
        let msg_id = self.inner.next_msg_id.fetch_add(1, Ordering::Relaxed);

        // Register the waiter before sending so a fast reply cannot race us.
        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .insert(msg_id, PendingCall { stream_id, tx });
        let guard = PendingGuard {
            inner: &self.inner,
            msg_id,
            armed: true,
        };

        self.inner
            .transport
            .send_frame(Frame::call(stream_id, msg_id, payload))
            .await
            .map_err(RpcError::Transport)?;
        tracing::debug!(stream_id, msg_id, method, "call: request sent");

        let reply = rx
            .await
            .map_err(|_| RpcError::Transport(TransportError::Closed))?;
        guard.disarm();
        let reply = reply?;
        match reply.error {
            Some(app) => Err(RpcError::Application(app)),
            None => Ok(reply.result),
        }
    }

    async fn send_control(&self, payload: ControlPayload) -> Result<(), RpcError> {
        let bytes = payload.encode()?;
        self.inner
            .transport
            .send_frame(Frame::control(bytes))
            .await
            .map_err(RpcError::Transport)
    }

    /// Drop every trace of a stream and fail whatever was waiting on it.
    fn retire_stream(&self, stream_id: u32) {
        self.inner.closed_streams.lock().insert(stream_id);
        self.inner.services.lock().remove(&stream_id);
        self.inner.early_opens.lock().remove(&stream_id);

        if let Some(tx) = self.inner.dials.lock().remove(&stream_id) {
            let _ = tx.send(Err(RpcError::StreamClosed { stream_id }));
        }

        let waiters: Vec<PendingCall> = {
            let mut pending = self.inner.pending.lock();
            let ids: Vec<u64> = pending
                .iter()
                .filter(|(_, call)| call.stream_id == stream_id)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
        };
        for call in waiters {
            let _ = call.tx.send(Err(RpcError::StreamClosed { stream_id }));
        }
    }

    /// Fail everything; called once when the demux loop exits.
    fn shutdown(&self) {
        tracing::debug!(role = %self.inner.role, "broker: shutting down");

        let pending: Vec<PendingCall> = {
            let mut map = self.inner.pending.lock();
            map.drain().map(|(_, call)| call).collect()
        };
        for call in pending {
            let _ = call.tx.send(Err(RpcError::Transport(TransportError::Closed)));
        }

        let dials: Vec<oneshot::Sender<Result<(), RpcError>>> = {
            let mut map = self.inner.dials.lock();
            map.drain().map(|(_, tx)| tx).collect()
        };
        for tx in dials {
            let _ = tx.send(Err(RpcError::Transport(TransportError::Closed)));
        }

        // Dropping the call queues ends every serve task.
        self.inner.services.lock().clear();

        // Propagate EOF so the peer's demux exits too.
        let transport = self.inner.transport.clone();
        tokio::spawn(async move { transport.shutdown().await });
    }
}

struct PendingGuard<'a> {
    inner: &'a BrokerInner,
    msg_id: u64,
    armed: bool,
}

impl PendingGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.pending.lock().remove(&self.msg_id);
        }
    }
}

/// Accept one dial on a published stream, then serve its calls until the
/// stream closes.
async fn serve_stream(
    broker: Broker,
    stream_id: u32,
    service: Arc<dyn StreamService>,
    opened: oneshot::Receiver<()>,
    mut calls: mpsc::UnboundedReceiver<InboundCall>,
) {
    if opened.await.is_err() {
        tracing::debug!(stream_id, "serve_stream: retired before any dial");
        return;
    }

    if let Err(e) = broker.send_control(ControlPayload::Accept { stream_id }).await {
        tracing::warn!(stream_id, error = %e, "serve_stream: failed to send accept");
        return;
    }
    tracing::debug!(stream_id, "serve_stream: dial accepted");

    while let Some(call) = calls.recv().await {
        let envelope = match CallEnvelope::decode(&call.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(
                    stream_id,
                    msg_id = call.msg_id,
                    error = %e,
                    "serve_stream: malformed call envelope"
                );
                broker
                    .close_stream(stream_id, CloseReason::ProtocolViolation)
                    .await;
                return;
            }
        };

        tracing::debug!(
            stream_id,
            msg_id = call.msg_id,
            method = %envelope.method,
            "serve_stream: dispatching"
        );

        // A panicking handler must not take the whole process down; the
        // caller would otherwise hang waiting for this reply.
        let outcome = AssertUnwindSafe(service.call(&envelope.method, &envelope.args))
            .catch_unwind()
            .await;
        let reply = match outcome {
            Ok(Ok(result)) => ReplyEnvelope::ok(result),
            Ok(Err(app)) => ReplyEnvelope::err(app),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::warn!(
                    stream_id,
                    method = %envelope.method,
                    message,
                    "serve_stream: handler panicked"
                );
                ReplyEnvelope::err(ApplicationError::new(format!("handler panicked: {message}")))
            }
        };

        let payload = match reply.encode() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(stream_id, error = %e, "serve_stream: reply encode failed");
                let fallback =
                    ReplyEnvelope::err(ApplicationError::new(format!("reply encoding failed: {e}")));
                match fallback.encode() {
                    Ok(payload) => payload,
                    Err(_) => continue,
                }
            }
        };

        if let Err(e) = broker
            .inner
            .transport
            .send_frame(Frame::reply(stream_id, call.msg_id, payload))
            .await
        {
            tracing::warn!(
                stream_id,
                msg_id = call.msg_id,
                error = %e,
                "serve_stream: failed to send reply"
            );
            return;
        }
    }

    tracing::debug!(stream_id, "serve_stream: stream closed");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// One dialed logical stream, owned by the client stub wrapping it.
pub struct StreamHandle {
    stream_id: u32,
    broker: Broker,
    closed: AtomicBool,
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("stream_id", &self.stream_id)
            .finish_non_exhaustive()
    }
}

impl StreamHandle {
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// The broker this handle came from; sub-streams are dialed through it.
    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// One call-and-reply round trip with raw argument bytes.
    pub async fn call(&self, method: &str, args: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::StreamClosed {
                stream_id: self.stream_id,
            });
        }
        self.broker.call_raw(self.stream_id, method, args).await
    }

    /// One round trip with typed arguments and result.
    pub async fn call_typed<Req, Resp>(&self, method: &str, args: &Req) -> Result<Resp, RpcError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let bytes = encode_value(args)?;
        let result = self.call(method, bytes).await?;
        Ok(decode_value(&result)?)
    }

    /// Close this stream. In-flight calls on it fail; siblings are untouched.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.broker
            .close_stream(self.stream_id, CloseReason::Normal)
            .await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
