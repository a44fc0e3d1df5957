//! Service records of the agent orchestration platform
//!
//! The platform owns deployed services; this crate only reads their records
//! and asks the platform to build a service when none is provisioned yet.

pub mod normalize;
pub mod operate;

use crate::credentials::Password;
use crate::error::ConfigurationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

pub use normalize::{normalize_service_config, normalize_service_files};
pub use operate::OperatePlatform;

/// A deployed service as recorded by the platform
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceRecord {
    pub home_chain: Option<String>,
    pub chain_configs: BTreeMap<String, ChainConfig>,
    pub env_variables: BTreeMap<String, EnvVariable>,
    pub agent_addresses: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub ledger_config: LedgerConfig,
    pub chain_data: ChainData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub rpc: String,
    pub chain: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainData {
    pub multisig: Option<String>,
    /// On-chain service id; negative while the service is not minted
    pub token: Option<i64>,
    pub staking_program_id: Option<String>,
    pub instances: Vec<String>,
}

/// Declared environment variable with provisioning metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvVariable {
    pub name: String,
    pub description: String,
    pub value: Value,
    pub provision_type: String,
}

impl ServiceRecord {
    pub fn home_chain_config(&self) -> Option<&ChainConfig> {
        self.home_chain
            .as_deref()
            .and_then(|chain| self.chain_configs.get(chain))
    }

    /// Multisig of the home chain, if deployed
    pub fn home_multisig(&self) -> Option<&str> {
        self.home_chain_config()
            .and_then(|c| c.chain_data.multisig.as_deref())
            .filter(|m| !m.trim().is_empty())
    }

    pub fn declared(&self, key: &str) -> Option<&Value> {
        self.env_variables.get(key).map(|v| &v.value)
    }
}

/// True when no service exists or the first one has no home-chain multisig.
pub fn needs_provisioning(services: &[ServiceRecord]) -> bool {
    match services.first() {
        None => true,
        Some(service) => service.home_multisig().is_none(),
    }
}

/// Staking program declared by a chain template under `configurations.<chain>`.
pub fn staking_program_id(template: &Value, chain: &str) -> Option<String> {
    template
        .get("configurations")
        .and_then(|c| c.get(chain))
        .and_then(|c| c.get("staking_program_id"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Platform operations consumed by the setup flow
#[async_trait]
pub trait ServicePlatform: Send + Sync {
    /// Services known to the platform, in a stable order
    async fn list_services(&self) -> Result<Vec<ServiceRecord>, ConfigurationError>;

    /// Build the service described by `config_path` without starting it.
    async fn build_service_only(
        &self,
        config_path: &Path,
        staking_program_id: Option<&str>,
        password: &Password,
    ) -> Result<(), ConfigurationError>;
}
