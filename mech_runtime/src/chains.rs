//! Networks a mech service can be homed on

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportedChain {
    Gnosis,
    Base,
    Polygon,
    Optimism,
}

impl SupportedChain {
    pub const ALL: [SupportedChain; 4] = [
        SupportedChain::Gnosis,
        SupportedChain::Base,
        SupportedChain::Polygon,
        SupportedChain::Optimism,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SupportedChain::Gnosis => "gnosis",
            SupportedChain::Base => "base",
            SupportedChain::Polygon => "polygon",
            SupportedChain::Optimism => "optimism",
        }
    }

    /// EVM chain id
    pub fn chain_id(&self) -> u64 {
        match self {
            SupportedChain::Gnosis => 100,
            SupportedChain::Base => 8453,
            SupportedChain::Polygon => 137,
            SupportedChain::Optimism => 10,
        }
    }

    /// Prefix used by the per-chain ledger variables, e.g. `GNOSIS_LEDGER_RPC_0`.
    pub fn env_prefix(&self) -> String {
        self.as_str().to_uppercase()
    }

    pub fn rpc_var(&self) -> String {
        format!("{}_LEDGER_RPC_0", self.env_prefix())
    }

    pub fn chain_id_var(&self) -> String {
        format!("{}_LEDGER_CHAIN_ID", self.env_prefix())
    }

    /// File name of the service template for this chain.
    pub fn template_name(&self) -> String {
        format!("config_mech_{}.json", self.as_str())
    }

    pub fn supported_list() -> String {
        Self::ALL
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for SupportedChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SupportedChain {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| ConfigurationError::UnsupportedChain {
                chain: s.to_string(),
                supported: Self::supported_list(),
            })
    }
}
