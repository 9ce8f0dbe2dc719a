//! A simulated median oracle provider, good enough to drive the whole
//! bridge surface without a chain node.
//!
//! The plugin binary serves [`SimulatedFactory`] over TCP; the host binary
//! and the cross-process tests connect to it and walk the provider through
//! its lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use num_bigint::BigInt;
use parking_lot::Mutex;
use passerelle_core::{ApplicationError, HandshakeDescriptor};
use passerelle_oracle::{
    Account, AttributedObservation, AttributedSignature, ConfigDigest, ConfigDigestPrefix,
    ConfigDigester, ConfigTracker, ContractConfig, ContractReader, OracleProvider,
    ProviderFactory, ProviderSpec, Report, ReportCodec, ReportContext, RoundRequested,
    TransmissionDetails, Transmitter,
};
use uuid::Uuid;

pub const PROTOCOL_VERSION: u32 = 1;

/// Both binaries and the tests must present this exact identity.
pub fn descriptor() -> HandshakeDescriptor {
    HandshakeDescriptor::new(
        PROTOCOL_VERSION,
        "PASSERELLE_ORACLE_PLUGIN",
        "d7076e6c-sim-oracle-c0ffee",
    )
}

/// Deterministic stand-in for the onchain digest scheme, prefix 3.
fn simulated_digest(config: &ContractConfig) -> ConfigDigest {
    let mut out = [0u8; 32];
    out[1] = 0x03;
    out[2..10].copy_from_slice(&config.config_count.to_be_bytes());
    out[10..18].copy_from_slice(&config.offchain_config_version.to_be_bytes());
    out[18] = config.f;
    let mut acc: u8 = 0;
    for b in config
        .onchain_config
        .iter()
        .chain(config.offchain_config.iter())
    {
        acc = acc.wrapping_mul(31).wrapping_add(*b);
    }
    out[19] = acc;
    ConfigDigest(out)
}

struct ChainState {
    height: u64,
    config: ContractConfig,
    config_block: u64,
    epoch: u32,
    round: u8,
    latest_answer: BigInt,
    latest_timestamp: i64,
    transmissions: Vec<Report>,
}

/// In-memory contract state shared by one provider's capabilities.
pub struct SimulatedChain {
    state: Mutex<ChainState>,
}

impl SimulatedChain {
    pub fn new() -> Arc<Self> {
        let mut config = ContractConfig {
            config_digest: ConfigDigest::default(),
            config_count: 1,
            signers: vec![vec![0x01; 20], vec![0x02; 20], vec![0x03; 20], vec![0x04; 20]],
            transmitters: vec![
                "sim-node-0".to_string(),
                "sim-node-1".to_string(),
                "sim-node-2".to_string(),
                "sim-node-3".to_string(),
            ],
            f: 1,
            onchain_config: vec![0x01, 0x00],
            offchain_config_version: 2,
            offchain_config: vec![0x42; 32],
        };
        config.config_digest = simulated_digest(&config);

        Arc::new(Self {
            state: Mutex::new(ChainState {
                height: 1_000,
                config,
                config_block: 900,
                epoch: 1,
                round: 0,
                latest_answer: BigInt::from(0),
                latest_timestamp: 0,
                transmissions: Vec::new(),
            }),
        })
    }

    /// Every read of the chain advances it one block.
    fn tick(&self) -> u64 {
        let mut state = self.state.lock();
        state.height += 1;
        state.height
    }

    pub fn transmission_count(&self) -> usize {
        self.state.lock().transmissions.len()
    }
}

struct SimulatedTransmitter {
    chain: Arc<SimulatedChain>,
    account: Account,
}

#[async_trait]
impl Transmitter for SimulatedTransmitter {
    async fn submit(
        &self,
        context: ReportContext,
        report: Report,
        _signatures: Vec<AttributedSignature>,
    ) -> Result<(), ApplicationError> {
        let median = BigInt::from_signed_bytes_be(&report);
        let mut state = self.chain.state.lock();
        state.epoch = context.report_timestamp.epoch;
        state.round = context.report_timestamp.round;
        state.latest_answer = median;
        state.latest_timestamp = 1_700_000_000 + state.height as i64;
        state.transmissions.push(report);
        Ok(())
    }

    async fn latest_config_digest_and_epoch(
        &self,
    ) -> Result<(ConfigDigest, u32), ApplicationError> {
        let state = self.chain.state.lock();
        Ok((state.config.config_digest, state.epoch))
    }

    async fn own_account(&self) -> Result<Account, ApplicationError> {
        Ok(self.account.clone())
    }
}

struct SimulatedTracker {
    chain: Arc<SimulatedChain>,
}

#[async_trait]
impl ConfigTracker for SimulatedTracker {
    async fn latest_config_details(&self) -> Result<(u64, ConfigDigest), ApplicationError> {
        let state = self.chain.state.lock();
        Ok((state.config_block, state.config.config_digest))
    }

    async fn latest_config(&self, since_block: u64) -> Result<ContractConfig, ApplicationError> {
        let state = self.chain.state.lock();
        if since_block > state.config_block {
            return Err(ApplicationError::new(format!(
                "no config at or after block {since_block}"
            )));
        }
        Ok(state.config.clone())
    }

    async fn latest_block_height(&self) -> Result<u64, ApplicationError> {
        Ok(self.chain.tick())
    }
}

struct SimulatedDigester;

#[async_trait]
impl ConfigDigester for SimulatedDigester {
    async fn config_digest(
        &self,
        config: &ContractConfig,
    ) -> Result<ConfigDigest, ApplicationError> {
        Ok(simulated_digest(config))
    }

    fn config_digest_prefix(&self) -> ConfigDigestPrefix {
        ConfigDigestPrefix(3)
    }
}

/// Reports are the median's sign-plus-magnitude bytes, nothing else.
struct MedianCodec;

#[async_trait]
impl ReportCodec for MedianCodec {
    async fn build_report(
        &self,
        observations: &[AttributedObservation],
    ) -> Result<Report, ApplicationError> {
        if observations.is_empty() {
            return Err(ApplicationError::new("no observations to aggregate"));
        }
        let mut values: Vec<BigInt> = observations.iter().map(|o| o.value.clone()).collect();
        values.sort();
        Ok(values[values.len() / 2].to_signed_bytes_be())
    }

    async fn median_from_report(&self, report: &Report) -> Result<BigInt, ApplicationError> {
        if report.is_empty() {
            return Err(ApplicationError::new("empty report"));
        }
        Ok(BigInt::from_signed_bytes_be(report))
    }
}

struct SimulatedReader {
    chain: Arc<SimulatedChain>,
}

#[async_trait]
impl ContractReader for SimulatedReader {
    async fn latest_transmission_details(
        &self,
    ) -> Result<TransmissionDetails, ApplicationError> {
        let state = self.chain.state.lock();
        Ok(TransmissionDetails {
            config_digest: state.config.config_digest,
            epoch: state.epoch,
            round: state.round,
            latest_answer: state.latest_answer.clone(),
            latest_timestamp: state.latest_timestamp,
        })
    }

    async fn latest_round_requested(
        &self,
        _lookback: Duration,
    ) -> Result<RoundRequested, ApplicationError> {
        let state = self.chain.state.lock();
        Ok(RoundRequested {
            config_digest: state.config.config_digest,
            epoch: state.epoch,
            round: state.round,
        })
    }
}

/// One simulated provider per created instance.
pub struct SimulatedProvider {
    chain: Arc<SimulatedChain>,
    started: AtomicBool,
    closed: AtomicBool,
    transmitter: Arc<SimulatedTransmitter>,
    tracker: Arc<SimulatedTracker>,
    digester: Arc<SimulatedDigester>,
    codec: Arc<MedianCodec>,
    reader: Arc<SimulatedReader>,
}

impl SimulatedProvider {
    pub fn new(spec: &ProviderSpec) -> Arc<Self> {
        let chain = SimulatedChain::new();
        let account = format!("sim-transmitter-{}", spec.transmissions_address);
        Arc::new(Self {
            chain: chain.clone(),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            transmitter: Arc::new(SimulatedTransmitter {
                chain: chain.clone(),
                account,
            }),
            tracker: Arc::new(SimulatedTracker {
                chain: chain.clone(),
            }),
            digester: Arc::new(SimulatedDigester),
            codec: Arc::new(MedianCodec),
            reader: Arc::new(SimulatedReader { chain }),
        })
    }

    pub fn chain(&self) -> &Arc<SimulatedChain> {
        &self.chain
    }
}

#[async_trait]
impl OracleProvider for SimulatedProvider {
    async fn start(&self) -> Result<(), ApplicationError> {
        self.started.store(true, Ordering::Relaxed);
        tracing::info!("simulated provider started");
        Ok(())
    }

    async fn close(&self) -> Result<(), ApplicationError> {
        self.closed.store(true, Ordering::Relaxed);
        tracing::info!("simulated provider closed");
        Ok(())
    }

    async fn ready(&self) -> Result<(), ApplicationError> {
        if self.started.load(Ordering::Relaxed) && !self.closed.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(ApplicationError::new("simulated provider not running"))
        }
    }

    async fn healthy(&self) -> Result<(), ApplicationError> {
        self.ready().await
    }

    fn transmitter(&self) -> Arc<dyn Transmitter> {
        self.transmitter.clone()
    }

    fn config_tracker(&self) -> Arc<dyn ConfigTracker> {
        self.tracker.clone()
    }

    fn config_digester(&self) -> Arc<dyn ConfigDigester> {
        self.digester.clone()
    }

    fn report_codec(&self) -> Arc<dyn ReportCodec> {
        self.codec.clone()
    }

    fn contract_reader(&self) -> Arc<dyn ContractReader> {
        self.reader.clone()
    }
}

/// Builds one [`SimulatedProvider`] per create call.
pub struct SimulatedFactory;

#[async_trait]
impl ProviderFactory for SimulatedFactory {
    async fn create(
        &self,
        job_id: Uuid,
        spec: &ProviderSpec,
    ) -> Result<Arc<dyn OracleProvider>, ApplicationError> {
        if spec.node_endpoint_http.is_empty() {
            return Err(ApplicationError::new("node endpoint is required"));
        }
        tracing::info!(%job_id, endpoint = %spec.node_endpoint_http, "building simulated provider");
        Ok(SimulatedProvider::new(spec))
    }
}
