//! One provider instance, proxied over its own stream.
//!
//! Lifecycle methods travel on the instance stream itself. Capability
//! accessors publish a fresh stream per call and hand back its ID; the
//! client dials it and wraps the handle in the matching typed stub.

use std::sync::Arc;

use parking_lot::Mutex;
use passerelle_core::{
    ApplicationError, Broker, CloseReason, RpcError, ServiceFuture, StreamHandle, StreamService,
};

use crate::api::OracleProvider;
use crate::config_tracker::{ConfigTrackerClient, ConfigTrackerServer};
use crate::contract_reader::{ContractReaderClient, ContractReaderServer};
use crate::digester::{ConfigDigesterClient, ConfigDigesterServer};
use crate::report_codec::{ReportCodecClient, ReportCodecServer};
use crate::transmitter::{TransmitterClient, TransmitterServer};
use crate::wire::{encode_reply, methods, unknown_method, StreamRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Started,
    Closed,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

fn closed_error() -> ApplicationError {
    ApplicationError::new("instance closed")
}

/// Host-side stub for one created instance.
#[derive(Debug)]
pub struct InstanceClient {
    handle: StreamHandle,
    state: Mutex<LifecycleState>,
}

impl InstanceClient {
    pub(crate) fn new(handle: StreamHandle) -> Self {
        Self {
            handle,
            state: Mutex::new(LifecycleState::Created),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Start the remote provider.
    ///
    /// The instance counts as started even when the provider reports a
    /// startup failure; only a transport failure leaves the state alone.
    pub async fn start(&self) -> Result<(), RpcError> {
        let result = self.handle.call_typed(methods::INSTANCE_START, &()).await;
        match &result {
            Ok(()) | Err(RpcError::Application(_)) => {
                *self.state.lock() = LifecycleState::Started;
            }
            Err(_) => {}
        }
        result
    }

    /// Close the remote provider and this stub.
    ///
    /// The local stream closes whatever the remote outcome was; any further
    /// call on this instance fails with [`RpcError::StreamClosed`].
    pub async fn close(&self) -> Result<(), RpcError> {
        let result = self.handle.call_typed(methods::INSTANCE_CLOSE, &()).await;
        *self.state.lock() = LifecycleState::Closed;
        self.handle.close().await;
        result
    }

    pub async fn ready(&self) -> Result<(), RpcError> {
        self.handle.call_typed(methods::INSTANCE_READY, &()).await
    }

    pub async fn healthy(&self) -> Result<(), RpcError> {
        self.handle.call_typed(methods::INSTANCE_HEALTHY, &()).await
    }

    /// Each accessor call opens a fresh capability stream; hold on to the
    /// returned stub instead of re-fetching per call.
    pub async fn transmitter(&self) -> Result<TransmitterClient, RpcError> {
        let handle = self.open_capability(methods::INSTANCE_TRANSMITTER).await?;
        Ok(TransmitterClient::new(handle))
    }

    pub async fn config_tracker(&self) -> Result<ConfigTrackerClient, RpcError> {
        let handle = self.open_capability(methods::INSTANCE_CONFIG_TRACKER).await?;
        Ok(ConfigTrackerClient::new(handle))
    }

    pub async fn config_digester(&self) -> Result<ConfigDigesterClient, RpcError> {
        let handle = self.open_capability(methods::INSTANCE_CONFIG_DIGESTER).await?;
        Ok(ConfigDigesterClient::new(handle))
    }

    pub async fn report_codec(&self) -> Result<ReportCodecClient, RpcError> {
        let handle = self.open_capability(methods::INSTANCE_REPORT_CODEC).await?;
        Ok(ReportCodecClient::new(handle))
    }

    pub async fn contract_reader(&self) -> Result<ContractReaderClient, RpcError> {
        let handle = self.open_capability(methods::INSTANCE_CONTRACT_READER).await?;
        Ok(ContractReaderClient::new(handle))
    }

    async fn open_capability(&self, method: &'static str) -> Result<StreamHandle, RpcError> {
        let stream_ref: StreamRef = self.handle.call_typed(method, &()).await?;
        self.handle.broker().dial(stream_ref.stream_id).await
    }
}

/// Plugin-side stub serving one created instance.
pub struct InstanceServer {
    broker: Broker,
    provider: Arc<dyn OracleProvider>,
    state: Mutex<LifecycleState>,
    /// Capability streams opened on behalf of this instance; torn down on
    /// close.
    children: Mutex<Vec<u32>>,
}

impl InstanceServer {
    pub fn new(broker: Broker, provider: Arc<dyn OracleProvider>) -> Self {
        Self {
            broker,
            provider,
            state: Mutex::new(LifecycleState::Created),
            children: Mutex::new(Vec::new()),
        }
    }

    fn ensure_open(&self) -> Result<(), ApplicationError> {
        if *self.state.lock() == LifecycleState::Closed {
            Err(closed_error())
        } else {
            Ok(())
        }
    }

    async fn handle_start(&self) -> Result<Vec<u8>, ApplicationError> {
        {
            let mut state = self.state.lock();
            match *state {
                LifecycleState::Closed => return Err(closed_error()),
                LifecycleState::Started => {
                    return Err(ApplicationError::new("instance already started"))
                }
                // The instance counts as started even if the provider's own
                // start fails; close is still required to release it.
                LifecycleState::Created => *state = LifecycleState::Started,
            }
        }
        tracing::debug!("instance: starting provider");
        self.provider.start().await?;
        encode_reply(&())
    }

    async fn handle_close(&self) -> Result<Vec<u8>, ApplicationError> {
        {
            let mut state = self.state.lock();
            if *state == LifecycleState::Closed {
                return Err(ApplicationError::new("instance already closed"));
            }
            *state = LifecycleState::Closed;
        }
        tracing::debug!("instance: closing provider");
        let result = self.provider.close().await;

        let children: Vec<u32> = std::mem::take(&mut *self.children.lock());
        for child in children {
            self.broker.close_stream(child, CloseReason::Normal).await;
        }

        result?;
        encode_reply(&())
    }

    fn open_capability(&self, service: Arc<dyn StreamService>) -> Result<Vec<u8>, ApplicationError> {
        self.ensure_open()?;
        let stream_id = self.broker.allocate();
        self.broker.publish(stream_id, service);
        self.children.lock().push(stream_id);
        tracing::debug!(stream_id, "instance: capability published");
        encode_reply(&StreamRef { stream_id })
    }
}

impl StreamService for InstanceServer {
    fn call<'a>(&'a self, method: &'a str, _args: &'a [u8]) -> ServiceFuture<'a> {
        Box::pin(async move {
            match method {
                methods::INSTANCE_START => self.handle_start().await,
                methods::INSTANCE_CLOSE => self.handle_close().await,
                methods::INSTANCE_READY => {
                    self.ensure_open()?;
                    self.provider.ready().await?;
                    encode_reply(&())
                }
                methods::INSTANCE_HEALTHY => {
                    self.ensure_open()?;
                    self.provider.healthy().await?;
                    encode_reply(&())
                }
                methods::INSTANCE_TRANSMITTER => self.open_capability(Arc::new(
                    TransmitterServer::new(self.provider.transmitter()),
                )),
                methods::INSTANCE_CONFIG_TRACKER => self.open_capability(Arc::new(
                    ConfigTrackerServer::new(self.provider.config_tracker()),
                )),
                methods::INSTANCE_CONFIG_DIGESTER => self.open_capability(Arc::new(
                    ConfigDigesterServer::new(self.provider.config_digester()),
                )),
                methods::INSTANCE_REPORT_CODEC => self.open_capability(Arc::new(
                    ReportCodecServer::new(self.provider.report_codec()),
                )),
                methods::INSTANCE_CONTRACT_READER => self.open_capability(Arc::new(
                    ContractReaderServer::new(self.provider.contract_reader()),
                )),
                other => Err(unknown_method("instance", other)),
            }
        })
    }
}
