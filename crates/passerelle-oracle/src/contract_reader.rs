//! Contract reader capability, proxied over its own stream.

use std::sync::Arc;
use std::time::Duration;

use passerelle_core::{RpcError, ServiceFuture, StreamHandle, StreamService};

use crate::api::ContractReader;
use crate::types::{RoundRequested, TransmissionDetails};
use crate::wire::{decode_args, encode_reply, methods, unknown_method, LatestRoundRequestedRequest};

#[derive(Debug)]
pub struct ContractReaderClient {
    handle: StreamHandle,
}

impl ContractReaderClient {
    pub(crate) fn new(handle: StreamHandle) -> Self {
        Self { handle }
    }

    pub async fn latest_transmission_details(&self) -> Result<TransmissionDetails, RpcError> {
        self.handle
            .call_typed(methods::CONTRACT_READER_LATEST_TRANSMISSION_DETAILS, &())
            .await
    }

    pub async fn latest_round_requested(
        &self,
        lookback: Duration,
    ) -> Result<RoundRequested, RpcError> {
        self.handle
            .call_typed(
                methods::CONTRACT_READER_LATEST_ROUND_REQUESTED,
                &LatestRoundRequestedRequest { lookback },
            )
            .await
    }
}

pub struct ContractReaderServer {
    inner: Arc<dyn ContractReader>,
}

impl ContractReaderServer {
    pub fn new(inner: Arc<dyn ContractReader>) -> Self {
        Self { inner }
    }
}

impl StreamService for ContractReaderServer {
    fn call<'a>(&'a self, method: &'a str, args: &'a [u8]) -> ServiceFuture<'a> {
        Box::pin(async move {
            match method {
                methods::CONTRACT_READER_LATEST_TRANSMISSION_DETAILS => {
                    let details = self.inner.latest_transmission_details().await?;
                    encode_reply(&details)
                }
                methods::CONTRACT_READER_LATEST_ROUND_REQUESTED => {
                    let request: LatestRoundRequestedRequest = decode_args(args)?;
                    let round = self.inner.latest_round_requested(request.lookback).await?;
                    encode_reply(&round)
                }
                other => Err(unknown_method("contract reader", other)),
            }
        })
    }
}
