//! passerelle-oracle: the median oracle provider surface, proxied across
//! the passerelle bridge.
//!
//! This crate defines:
//! - Domain types ([`ContractConfig`], [`ReportContext`], [`ConfigDigest`], ...)
//! - The provider traits a plugin implements ([`ProviderFactory`], [`OracleProvider`])
//! - Typed client stubs the host consumes ([`ProviderClient`], [`InstanceClient`],
//!   [`TransmitterClient`], ...)
//! - Their serving counterparts ([`ProviderServer`], [`InstanceServer`], ...)
//! - Connection entry points ([`connect_provider`], [`serve_provider`])

#![forbid(unsafe_code)]

mod api;
mod config_tracker;
mod contract_reader;
mod digester;
mod instance;
mod provider;
mod report_codec;
mod spec;
mod transmitter;
mod types;
mod wire;

pub use api::*;
pub use config_tracker::*;
pub use contract_reader::*;
pub use digester::*;
pub use instance::*;
pub use provider::*;
pub use report_codec::*;
pub use spec::*;
pub use transmitter::*;
pub use types::*;
pub use wire::*;
