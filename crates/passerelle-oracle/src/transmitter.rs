//! Transmitter capability, proxied over its own stream.

use std::sync::Arc;

use passerelle_core::{RpcError, ServiceFuture, StreamHandle, StreamService};

use crate::api::Transmitter;
use crate::types::{Account, AttributedSignature, ConfigDigest, Report, ReportContext};
use crate::wire::{
    decode_args, encode_reply, methods, unknown_method, LatestConfigDigestAndEpochReply,
    TransmitRequest,
};

/// Host-side stub. Every method is one call on the capability's stream.
#[derive(Debug)]
pub struct TransmitterClient {
    handle: StreamHandle,
}

impl TransmitterClient {
    pub(crate) fn new(handle: StreamHandle) -> Self {
        Self { handle }
    }

    pub async fn submit(
        &self,
        context: ReportContext,
        report: Report,
        signatures: Vec<AttributedSignature>,
    ) -> Result<(), RpcError> {
        let request = TransmitRequest {
            context,
            report,
            signatures,
        };
        self.handle
            .call_typed(methods::TRANSMITTER_SUBMIT, &request)
            .await
    }

    pub async fn latest_config_digest_and_epoch(
        &self,
    ) -> Result<(ConfigDigest, u32), RpcError> {
        let reply: LatestConfigDigestAndEpochReply = self
            .handle
            .call_typed(methods::TRANSMITTER_LATEST_CONFIG_DIGEST_AND_EPOCH, &())
            .await?;
        Ok((reply.config_digest, reply.epoch))
    }

    pub async fn own_account(&self) -> Result<Account, RpcError> {
        self.handle
            .call_typed(methods::TRANSMITTER_OWN_ACCOUNT, &())
            .await
    }
}

/// Plugin-side stub serving one provider's transmitter.
pub struct TransmitterServer {
    inner: Arc<dyn Transmitter>,
}

impl TransmitterServer {
    pub fn new(inner: Arc<dyn Transmitter>) -> Self {
        Self { inner }
    }
}

impl StreamService for TransmitterServer {
    fn call<'a>(&'a self, method: &'a str, args: &'a [u8]) -> ServiceFuture<'a> {
        Box::pin(async move {
            match method {
                methods::TRANSMITTER_SUBMIT => {
                    let request: TransmitRequest = decode_args(args)?;
                    self.inner
                        .submit(request.context, request.report, request.signatures)
                        .await?;
                    encode_reply(&())
                }
                methods::TRANSMITTER_LATEST_CONFIG_DIGEST_AND_EPOCH => {
                    let (config_digest, epoch) =
                        self.inner.latest_config_digest_and_epoch().await?;
                    encode_reply(&LatestConfigDigestAndEpochReply {
                        config_digest,
                        epoch,
                    })
                }
                methods::TRANSMITTER_OWN_ACCOUNT => {
                    let account = self.inner.own_account().await?;
                    encode_reply(&account)
                }
                other => Err(unknown_method("transmitter", other)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use passerelle_core::ApplicationError;

    struct NullTransmitter;

    #[async_trait]
    impl Transmitter for NullTransmitter {
        async fn submit(
            &self,
            _context: ReportContext,
            _report: Report,
            _signatures: Vec<AttributedSignature>,
        ) -> Result<(), ApplicationError> {
            Ok(())
        }

        async fn latest_config_digest_and_epoch(
            &self,
        ) -> Result<(ConfigDigest, u32), ApplicationError> {
            Ok((ConfigDigest::default(), 0))
        }

        async fn own_account(&self) -> Result<Account, ApplicationError> {
            Ok("null".to_string())
        }
    }

    #[tokio::test]
    async fn unknown_methods_are_rejected() {
        let server = TransmitterServer::new(Arc::new(NullTransmitter));
        let err = server
            .call("Transmitter.Bogus", &[])
            .await
            .expect_err("must fail");
        assert_eq!(err.message, "transmitter: unknown method Transmitter.Bogus");
    }

    #[tokio::test]
    async fn methods_from_other_services_do_not_match() {
        let server = TransmitterServer::new(Arc::new(NullTransmitter));
        let err = server
            .call(methods::CONFIG_TRACKER_LATEST_BLOCK_HEIGHT, &[])
            .await
            .expect_err("must fail");
        assert!(err.message.contains("unknown method"));
    }
}
