//! Config tracker capability, proxied over its own stream.

use std::sync::Arc;

use passerelle_core::{RpcError, ServiceFuture, StreamHandle, StreamService};

use crate::api::ConfigTracker;
use crate::types::{ConfigDigest, ContractConfig};
use crate::wire::{
    decode_args, encode_reply, methods, unknown_method, LatestConfigDetailsReply,
    LatestConfigRequest,
};

#[derive(Debug)]
pub struct ConfigTrackerClient {
    handle: StreamHandle,
}

impl ConfigTrackerClient {
    pub(crate) fn new(handle: StreamHandle) -> Self {
        Self { handle }
    }

    pub async fn latest_config_details(&self) -> Result<(u64, ConfigDigest), RpcError> {
        let reply: LatestConfigDetailsReply = self
            .handle
            .call_typed(methods::CONFIG_TRACKER_LATEST_CONFIG_DETAILS, &())
            .await?;
        Ok((reply.changed_in_block, reply.config_digest))
    }

    pub async fn latest_config(&self, since_block: u64) -> Result<ContractConfig, RpcError> {
        self.handle
            .call_typed(
                methods::CONFIG_TRACKER_LATEST_CONFIG,
                &LatestConfigRequest { since_block },
            )
            .await
    }

    pub async fn latest_block_height(&self) -> Result<u64, RpcError> {
        self.handle
            .call_typed(methods::CONFIG_TRACKER_LATEST_BLOCK_HEIGHT, &())
            .await
    }
}

pub struct ConfigTrackerServer {
    inner: Arc<dyn ConfigTracker>,
}

impl ConfigTrackerServer {
    pub fn new(inner: Arc<dyn ConfigTracker>) -> Self {
        Self { inner }
    }
}

impl StreamService for ConfigTrackerServer {
    fn call<'a>(&'a self, method: &'a str, args: &'a [u8]) -> ServiceFuture<'a> {
        Box::pin(async move {
            match method {
                methods::CONFIG_TRACKER_LATEST_CONFIG_DETAILS => {
                    let (changed_in_block, config_digest) =
                        self.inner.latest_config_details().await?;
                    encode_reply(&LatestConfigDetailsReply {
                        changed_in_block,
                        config_digest,
                    })
                }
                methods::CONFIG_TRACKER_LATEST_CONFIG => {
                    let request: LatestConfigRequest = decode_args(args)?;
                    let config = self.inner.latest_config(request.since_block).await?;
                    encode_reply(&config)
                }
                methods::CONFIG_TRACKER_LATEST_BLOCK_HEIGHT => {
                    let height = self.inner.latest_block_height().await?;
                    encode_reply(&height)
                }
                other => Err(unknown_method("config tracker", other)),
            }
        })
    }
}
