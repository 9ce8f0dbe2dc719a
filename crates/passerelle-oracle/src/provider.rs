//! Provider service on the primary stream, and the two connection entry
//! points.
//!
//! The plugin side calls [`serve_provider`] once per accepted connection and
//! blocks in it for the connection's lifetime. The host side calls
//! [`connect_provider`], which spawns the demux loop and hands back a
//! [`ProviderClient`].

use std::sync::Arc;

use passerelle_core::{
    exchange, ApplicationError, Broker, HandshakeDescriptor, HandshakeError, Role, RpcError,
    ServiceFuture, StreamHandle, StreamService, StreamTransport, TransportError, PRIMARY_STREAM_ID,
};
use uuid::Uuid;

use crate::api::ProviderFactory;
use crate::instance::{InstanceClient, InstanceServer};
use crate::spec::ProviderSpec;
use crate::wire::{
    decode_args, encode_reply, methods, unknown_method, CreateInstanceRequest, StreamRef,
};

/// Host-side stub for the plugin's provider factory.
#[derive(Debug)]
pub struct ProviderClient {
    handle: StreamHandle,
}

impl ProviderClient {
    /// Ask the plugin to build a provider for `spec`, then dial the instance
    /// stream it publishes.
    pub async fn create_instance(
        &self,
        job_id: Uuid,
        spec: &ProviderSpec,
    ) -> Result<InstanceClient, RpcError> {
        let request = CreateInstanceRequest {
            job_id,
            spec: spec.clone(),
        };
        let stream_ref: StreamRef = self
            .handle
            .call_typed(methods::CREATE_INSTANCE, &request)
            .await?;
        tracing::debug!(stream_id = stream_ref.stream_id, "host: dialing instance stream");
        let handle = self.handle.broker().dial(stream_ref.stream_id).await?;
        Ok(InstanceClient::new(handle))
    }

    pub fn broker(&self) -> &Broker {
        self.handle.broker()
    }
}

/// Plugin-side service answering create requests on the primary stream.
pub struct ProviderServer {
    broker: Broker,
    factory: Arc<dyn ProviderFactory>,
}

impl ProviderServer {
    pub fn new(broker: Broker, factory: Arc<dyn ProviderFactory>) -> Self {
        Self { broker, factory }
    }

    async fn handle_create(&self, args: &[u8]) -> Result<Vec<u8>, ApplicationError> {
        let request: CreateInstanceRequest = decode_args(args)?;
        tracing::info!(job_id = %request.job_id, "provider: creating instance");
        let provider = self.factory.create(request.job_id, &request.spec).await?;

        let stream_id = self.broker.allocate();
        self.broker.publish(
            stream_id,
            Arc::new(InstanceServer::new(self.broker.clone(), provider)),
        );
        tracing::debug!(stream_id, "provider: instance published");
        encode_reply(&StreamRef { stream_id })
    }
}

impl StreamService for ProviderServer {
    fn call<'a>(&'a self, method: &'a str, args: &'a [u8]) -> ServiceFuture<'a> {
        Box::pin(async move {
            match method {
                methods::CREATE_INSTANCE => self.handle_create(args).await,
                other => Err(unknown_method("provider", other)),
            }
        })
    }
}

/// Host-side connection failure.
#[derive(Debug)]
pub enum ConnectError {
    Handshake(HandshakeError),
    Rpc(RpcError),
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Handshake(e) => write!(f, "handshake failed: {e}"),
            Self::Rpc(e) => write!(f, "primary stream dial failed: {e}"),
        }
    }
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Handshake(e) => Some(e),
            Self::Rpc(e) => Some(e),
        }
    }
}

/// Plugin-side serve failure.
#[derive(Debug)]
pub enum ServeError {
    Handshake(HandshakeError),
    Transport(TransportError),
}

impl std::fmt::Display for ServeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Handshake(e) => write!(f, "handshake failed: {e}"),
            Self::Transport(e) => write!(f, "transport failed: {e}"),
        }
    }
}

impl std::error::Error for ServeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Handshake(e) => Some(e),
            Self::Transport(e) => Some(e),
        }
    }
}

/// Establish the host end of a provider bridge.
///
/// Runs the handshake, spawns the broker demux, and dials the primary
/// stream the plugin serves its factory on.
pub async fn connect_provider(
    transport: StreamTransport,
    descriptor: &HandshakeDescriptor,
) -> Result<ProviderClient, ConnectError> {
    exchange(&transport, descriptor, Role::Host)
        .await
        .map_err(ConnectError::Handshake)?;

    let broker = Broker::new(transport, Role::Host);
    let demux = broker.clone();
    tokio::spawn(async move {
        if let Err(e) = demux.run().await {
            tracing::warn!(error = %e, "host: demux exited with transport error");
        }
    });

    let handle = broker
        .dial(PRIMARY_STREAM_ID)
        .await
        .map_err(ConnectError::Rpc)?;
    tracing::info!("host: provider bridge established");
    Ok(ProviderClient { handle })
}

/// Serve the plugin end of a provider bridge until the connection ends.
pub async fn serve_provider(
    transport: StreamTransport,
    descriptor: &HandshakeDescriptor,
    factory: Arc<dyn ProviderFactory>,
) -> Result<(), ServeError> {
    exchange(&transport, descriptor, Role::Plugin)
        .await
        .map_err(ServeError::Handshake)?;

    let broker = Broker::new(transport, Role::Plugin);
    broker.publish(
        PRIMARY_STREAM_ID,
        Arc::new(ProviderServer::new(broker.clone(), factory)),
    );
    tracing::info!("plugin: provider bridge established");
    broker.run().await.map_err(ServeError::Transport)
}
