//! Offchain config digester capability, proxied over its own stream.

use std::sync::Arc;

use passerelle_core::{RpcError, ServiceFuture, StreamHandle, StreamService};

use crate::api::ConfigDigester;
use crate::types::{ConfigDigest, ConfigDigestPrefix, ContractConfig};
use crate::wire::{decode_args, encode_reply, methods, unknown_method, ConfigDigestRequest};

#[derive(Debug)]
pub struct ConfigDigesterClient {
    handle: StreamHandle,
}

impl ConfigDigesterClient {
    pub(crate) fn new(handle: StreamHandle) -> Self {
        Self { handle }
    }

    pub async fn config_digest(&self, config: &ContractConfig) -> Result<ConfigDigest, RpcError> {
        self.handle
            .call_typed(
                methods::CONFIG_DIGESTER_CONFIG_DIGEST,
                &ConfigDigestRequest {
                    config: config.clone(),
                },
            )
            .await
    }

    /// Infallible on the implementing side, but still a remote call here.
    pub async fn config_digest_prefix(&self) -> Result<ConfigDigestPrefix, RpcError> {
        self.handle
            .call_typed(methods::CONFIG_DIGESTER_CONFIG_DIGEST_PREFIX, &())
            .await
    }
}

pub struct ConfigDigesterServer {
    inner: Arc<dyn ConfigDigester>,
}

impl ConfigDigesterServer {
    pub fn new(inner: Arc<dyn ConfigDigester>) -> Self {
        Self { inner }
    }
}

impl StreamService for ConfigDigesterServer {
    fn call<'a>(&'a self, method: &'a str, args: &'a [u8]) -> ServiceFuture<'a> {
        Box::pin(async move {
            match method {
                methods::CONFIG_DIGESTER_CONFIG_DIGEST => {
                    let request: ConfigDigestRequest = decode_args(args)?;
                    let digest = self.inner.config_digest(&request.config).await?;
                    encode_reply(&digest)
                }
                methods::CONFIG_DIGESTER_CONFIG_DIGEST_PREFIX => {
                    encode_reply(&self.inner.config_digest_prefix())
                }
                other => Err(unknown_method("config digester", other)),
            }
        })
    }
}
