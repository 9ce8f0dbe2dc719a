//! Report codec capability, proxied over its own stream.
//!
//! Medians are arbitrary-precision integers and cross the wire in a lossless
//! sign-plus-magnitude encoding, whatever their size.

use std::sync::Arc;

use num_bigint::BigInt;
use passerelle_core::{RpcError, ServiceFuture, StreamHandle, StreamService};

use crate::api::ReportCodec;
use crate::types::{AttributedObservation, Report};
use crate::wire::{
    decode_args, encode_reply, methods, unknown_method, BuildReportRequest,
    MedianFromReportRequest,
};

#[derive(Debug)]
pub struct ReportCodecClient {
    handle: StreamHandle,
}

impl ReportCodecClient {
    pub(crate) fn new(handle: StreamHandle) -> Self {
        Self { handle }
    }

    pub async fn build_report(
        &self,
        observations: &[AttributedObservation],
    ) -> Result<Report, RpcError> {
        self.handle
            .call_typed(
                methods::REPORT_CODEC_BUILD_REPORT,
                &BuildReportRequest {
                    observations: observations.to_vec(),
                },
            )
            .await
    }

    pub async fn median_from_report(&self, report: &Report) -> Result<BigInt, RpcError> {
        self.handle
            .call_typed(
                methods::REPORT_CODEC_MEDIAN_FROM_REPORT,
                &MedianFromReportRequest {
                    report: report.clone(),
                },
            )
            .await
    }
}

pub struct ReportCodecServer {
    inner: Arc<dyn ReportCodec>,
}

impl ReportCodecServer {
    pub fn new(inner: Arc<dyn ReportCodec>) -> Self {
        Self { inner }
    }
}

impl StreamService for ReportCodecServer {
    fn call<'a>(&'a self, method: &'a str, args: &'a [u8]) -> ServiceFuture<'a> {
        Box::pin(async move {
            match method {
                methods::REPORT_CODEC_BUILD_REPORT => {
                    let request: BuildReportRequest = decode_args(args)?;
                    let report = self.inner.build_report(&request.observations).await?;
                    encode_reply(&report)
                }
                methods::REPORT_CODEC_MEDIAN_FROM_REPORT => {
                    let request: MedianFromReportRequest = decode_args(args)?;
                    let median = self.inner.median_from_report(&request.report).await?;
                    encode_reply(&median)
                }
                other => Err(unknown_method("report codec", other)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use passerelle_core::ApplicationError;

    struct RejectingCodec;

    #[async_trait]
    impl ReportCodec for RejectingCodec {
        async fn build_report(
            &self,
            _observations: &[AttributedObservation],
        ) -> Result<Report, ApplicationError> {
            Err(ApplicationError::new("no observations"))
        }

        async fn median_from_report(&self, _report: &Report) -> Result<BigInt, ApplicationError> {
            Err(ApplicationError::new("empty report"))
        }
    }

    #[tokio::test]
    async fn malformed_arguments_come_back_as_application_errors() {
        let server = ReportCodecServer::new(Arc::new(RejectingCodec));
        let err = server
            .call(methods::REPORT_CODEC_BUILD_REPORT, &[0x9f, 0x01, 0x02])
            .await
            .expect_err("must fail");
        assert!(err.message.starts_with("malformed arguments"));
    }
}
