//! Request and reply shapes carried inside call envelopes.
//!
//! Single-value requests and replies travel as the bare serde value; only
//! multi-field messages get a struct here. Method names are qualified with
//! the serving stream's role so a misrouted call fails loudly instead of
//! hitting a same-named method on the wrong service.

use std::time::Duration;

use passerelle_core::{decode_value, encode_value, ApplicationError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::spec::ProviderSpec;
use crate::types::{
    AttributedObservation, AttributedSignature, ConfigDigest, ContractConfig, Report,
    ReportContext,
};

pub mod methods {
    pub const CREATE_INSTANCE: &str = "Provider.CreateInstance";

    pub const INSTANCE_START: &str = "Instance.Start";
    pub const INSTANCE_CLOSE: &str = "Instance.Close";
    pub const INSTANCE_READY: &str = "Instance.Ready";
    pub const INSTANCE_HEALTHY: &str = "Instance.Healthy";
    pub const INSTANCE_TRANSMITTER: &str = "Instance.Transmitter";
    pub const INSTANCE_CONFIG_TRACKER: &str = "Instance.ConfigTracker";
    pub const INSTANCE_CONFIG_DIGESTER: &str = "Instance.ConfigDigester";
    pub const INSTANCE_REPORT_CODEC: &str = "Instance.ReportCodec";
    pub const INSTANCE_CONTRACT_READER: &str = "Instance.ContractReader";

    pub const TRANSMITTER_SUBMIT: &str = "Transmitter.Submit";
    pub const TRANSMITTER_LATEST_CONFIG_DIGEST_AND_EPOCH: &str =
        "Transmitter.LatestConfigDigestAndEpoch";
    pub const TRANSMITTER_OWN_ACCOUNT: &str = "Transmitter.OwnAccount";

    pub const CONFIG_TRACKER_LATEST_CONFIG_DETAILS: &str = "ConfigTracker.LatestConfigDetails";
    pub const CONFIG_TRACKER_LATEST_CONFIG: &str = "ConfigTracker.LatestConfig";
    pub const CONFIG_TRACKER_LATEST_BLOCK_HEIGHT: &str = "ConfigTracker.LatestBlockHeight";

    pub const CONFIG_DIGESTER_CONFIG_DIGEST: &str = "ConfigDigester.ConfigDigest";
    pub const CONFIG_DIGESTER_CONFIG_DIGEST_PREFIX: &str = "ConfigDigester.ConfigDigestPrefix";

    pub const REPORT_CODEC_BUILD_REPORT: &str = "ReportCodec.BuildReport";
    pub const REPORT_CODEC_MEDIAN_FROM_REPORT: &str = "ReportCodec.MedianFromReport";

    pub const CONTRACT_READER_LATEST_TRANSMISSION_DETAILS: &str =
        "ContractReader.LatestTransmissionDetails";
    pub const CONTRACT_READER_LATEST_ROUND_REQUESTED: &str = "ContractReader.LatestRoundRequested";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    pub job_id: Uuid,
    pub spec: ProviderSpec,
}

/// Points the caller at a stream the replying side has published.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StreamRef {
    pub stream_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransmitRequest {
    pub context: ReportContext,
    pub report: Report,
    pub signatures: Vec<AttributedSignature>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LatestConfigDigestAndEpochReply {
    pub config_digest: ConfigDigest,
    pub epoch: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LatestConfigDetailsReply {
    pub changed_in_block: u64,
    pub config_digest: ConfigDigest,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LatestConfigRequest {
    pub since_block: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LatestRoundRequestedRequest {
    pub lookback: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReportRequest {
    pub observations: Vec<AttributedObservation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedianFromReportRequest {
    pub report: Report,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDigestRequest {
    pub config: ContractConfig,
}

/// Decode a request on the serving side; failures are the caller's fault and
/// travel back as application errors.
pub(crate) fn decode_args<T: DeserializeOwned>(args: &[u8]) -> Result<T, ApplicationError> {
    decode_value(args).map_err(|e| ApplicationError::new(format!("malformed arguments: {e}")))
}

pub(crate) fn encode_reply<T: Serialize>(value: &T) -> Result<Vec<u8>, ApplicationError> {
    encode_value(value).map_err(|e| ApplicationError::new(format!("reply encoding failed: {e}")))
}

pub(crate) fn unknown_method(service: &str, method: &str) -> ApplicationError {
    ApplicationError::new(format!("{service}: unknown method {method}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_instance_request_roundtrips() {
        let request = CreateInstanceRequest {
            job_id: Uuid::new_v4(),
            spec: ProviderSpec {
                id: 42,
                node_endpoint_http: "http://localhost:8899".to_string(),
                program_address: "prog".to_string(),
                ..ProviderSpec::default()
            },
        };

        let bytes = encode_value(&request).expect("encode");
        let decoded: CreateInstanceRequest = decode_value(&bytes).expect("decode");
        assert_eq!(decoded.job_id, request.job_id);
        assert_eq!(decoded.spec, request.spec);
    }

    #[test]
    fn decode_args_reports_malformed_input() {
        let err = decode_args::<CreateInstanceRequest>(&[0xff, 0xff]).expect_err("must fail");
        assert!(err.message.starts_with("malformed arguments"));
    }
}
