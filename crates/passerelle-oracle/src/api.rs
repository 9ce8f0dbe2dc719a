//! The provider surface a plugin implements.
//!
//! These traits are written from the implementor's point of view: every
//! failure is an [`ApplicationError`]. The host never sees these traits
//! directly; it talks to the typed client stubs, whose methods also surface
//! transport failures as [`passerelle_core::RpcError`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use num_bigint::BigInt;
use passerelle_core::ApplicationError;
use uuid::Uuid;

use crate::spec::ProviderSpec;
use crate::types::{
    Account, AttributedObservation, AttributedSignature, ConfigDigest, ConfigDigestPrefix,
    ContractConfig, Report, ReportContext, RoundRequested, TransmissionDetails,
};

/// Builds provider instances on the plugin side, one per create call.
#[async_trait]
pub trait ProviderFactory: Send + Sync + 'static {
    async fn create(
        &self,
        job_id: Uuid,
        spec: &ProviderSpec,
    ) -> Result<Arc<dyn OracleProvider>, ApplicationError>;
}

/// One configured provider: a lifecycle plus five capabilities.
///
/// The capability accessors are infallible; a provider constructs its
/// capabilities when it is built, not on access.
#[async_trait]
pub trait OracleProvider: Send + Sync + 'static {
    /// Begin background work (subscriptions, polling). Idempotence is not
    /// required; the bridge calls it at most once per instance.
    async fn start(&self) -> Result<(), ApplicationError>;

    /// Release resources. Called at most once, after which no other method
    /// is invoked.
    async fn close(&self) -> Result<(), ApplicationError>;

    /// Ok once the provider can serve reads.
    async fn ready(&self) -> Result<(), ApplicationError>;

    /// Ok while background work is keeping up.
    async fn healthy(&self) -> Result<(), ApplicationError>;

    fn transmitter(&self) -> Arc<dyn Transmitter>;
    fn config_tracker(&self) -> Arc<dyn ConfigTracker>;
    fn config_digester(&self) -> Arc<dyn ConfigDigester>;
    fn report_codec(&self) -> Arc<dyn ReportCodec>;
    fn contract_reader(&self) -> Arc<dyn ContractReader>;
}

/// Sends signed reports to the contract.
#[async_trait]
pub trait Transmitter: Send + Sync + 'static {
    async fn submit(
        &self,
        context: ReportContext,
        report: Report,
        signatures: Vec<AttributedSignature>,
    ) -> Result<(), ApplicationError>;

    async fn latest_config_digest_and_epoch(
        &self,
    ) -> Result<(ConfigDigest, u32), ApplicationError>;

    /// The account transmissions from this node are attributed to.
    async fn own_account(&self) -> Result<Account, ApplicationError>;
}

/// Follows the contract's configuration as it changes onchain.
///
/// There is no push channel across the bridge; consumers poll
/// [`latest_config_details`](Self::latest_config_details) for changes.
#[async_trait]
pub trait ConfigTracker: Send + Sync + 'static {
    /// Block the latest config landed in, and its digest.
    async fn latest_config_details(&self) -> Result<(u64, ConfigDigest), ApplicationError>;

    /// The full config, as of a block no earlier than `since_block`.
    async fn latest_config(&self, since_block: u64) -> Result<ContractConfig, ApplicationError>;

    async fn latest_block_height(&self) -> Result<u64, ApplicationError>;
}

/// Computes config digests offchain, matching the onchain scheme.
#[async_trait]
pub trait ConfigDigester: Send + Sync + 'static {
    async fn config_digest(&self, config: &ContractConfig) -> Result<ConfigDigest, ApplicationError>;

    fn config_digest_prefix(&self) -> ConfigDigestPrefix;
}

/// Builds and inspects median reports.
#[async_trait]
pub trait ReportCodec: Send + Sync + 'static {
    async fn build_report(
        &self,
        observations: &[AttributedObservation],
    ) -> Result<Report, ApplicationError>;

    /// Extract the median back out of a report produced by `build_report`.
    /// Values round-trip losslessly at any magnitude.
    async fn median_from_report(&self, report: &Report) -> Result<BigInt, ApplicationError>;
}

/// Reads protocol state the median plugin needs from the contract.
#[async_trait]
pub trait ContractReader: Send + Sync + 'static {
    async fn latest_transmission_details(
        &self,
    ) -> Result<TransmissionDetails, ApplicationError>;

    /// Most recent round request within `lookback` of now.
    async fn latest_round_requested(
        &self,
        lookback: Duration,
    ) -> Result<RoundRequested, ApplicationError>;
}
