//! Job-supplied provider configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Everything a plugin needs to construct one provider instance.
///
/// Carried verbatim from the host's job definition to the plugin; the bridge
/// never interprets any of it beyond moving it across.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Host-side job row this instance belongs to.
    pub id: i32,
    /// Bootstrap nodes follow config changes but never transmit.
    pub is_bootstrap: bool,
    /// HTTP endpoint of the chain node to read and transmit through.
    pub node_endpoint_http: String,
    /// Address of the deployed oracle program.
    pub program_address: String,
    /// Address of the program's state account.
    pub state_address: String,
    /// Address of the store program holding transmissions.
    pub store_program_address: String,
    /// Address of the transmissions account inside the store.
    pub transmissions_address: String,
    /// Simulate transactions before submitting them.
    pub use_preflight: bool,
    /// Commitment level for chain reads, e.g. "processed" or "confirmed".
    pub commitment: String,
    pub polling_interval: Option<Duration>,
    pub polling_ctx_timeout: Option<Duration>,
    pub stale_timeout: Option<Duration>,
}

impl Default for ProviderSpec {
    fn default() -> Self {
        Self {
            id: 0,
            is_bootstrap: false,
            node_endpoint_http: String::new(),
            program_address: String::new(),
            state_address: String::new(),
            store_program_address: String::new(),
            transmissions_address: String::new(),
            use_preflight: false,
            commitment: "confirmed".to_string(),
            polling_interval: None,
            polling_ctx_timeout: None,
            stale_timeout: None,
        }
    }
}
