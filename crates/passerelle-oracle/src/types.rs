//! Domain types shared by both ends of the bridge.
//!
//! Everything here crosses the wire inside call envelopes, so every type is
//! serde-serializable and every numeric field has an explicit width.

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

/// Identifies one onchain configuration of the oracle contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ConfigDigest(pub [u8; 32]);

impl ConfigDigest {
    /// The scheme prefix encoded in the first two bytes.
    pub fn prefix(&self) -> ConfigDigestPrefix {
        ConfigDigestPrefix(u16::from_be_bytes([self.0[0], self.0[1]]))
    }
}

impl std::fmt::Display for ConfigDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Distinguishes digest schemes; each chain family claims one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigDigestPrefix(pub u16);

impl std::fmt::Display for ConfigDigestPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Chain-level account identifier, in the chain's own text encoding.
pub type Account = String;

/// A serialized oracle report, opaque to the bridge.
pub type Report = Vec<u8>;

/// One full onchain configuration of the oracle contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractConfig {
    pub config_digest: ConfigDigest,
    /// How many configs this contract has seen, including this one.
    pub config_count: u64,
    pub signers: Vec<Vec<u8>>,
    pub transmitters: Vec<Account>,
    /// Maximum number of faulty oracles the protocol tolerates.
    pub f: u8,
    pub onchain_config: Vec<u8>,
    pub offchain_config_version: u64,
    pub offchain_config: Vec<u8>,
}

/// Protocol position a report was produced at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTimestamp {
    pub config_digest: ConfigDigest,
    pub epoch: u32,
    pub round: u8,
}

/// Everything a transmitter needs alongside the report bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportContext {
    pub report_timestamp: ReportTimestamp,
    pub extra_hash: [u8; 32],
}

/// A signature attributed to the oracle that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributedSignature {
    pub signature: Vec<u8>,
    /// Index of the signing oracle in the current config.
    pub signer: u8,
}

/// One oracle's observation, attributed to its producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributedObservation {
    pub timestamp: u32,
    pub value: BigInt,
    pub juels_per_fee_coin: BigInt,
    /// Index of the observing oracle in the current config.
    pub observer: u8,
}

/// What the contract currently reports as its latest transmission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransmissionDetails {
    pub config_digest: ConfigDigest,
    pub epoch: u32,
    pub round: u8,
    pub latest_answer: BigInt,
    /// Unix seconds.
    pub latest_timestamp: i64,
}

/// The most recent onchain request for a new round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRequested {
    pub config_digest: ConfigDigest,
    pub epoch: u32,
    pub round: u8,
}
