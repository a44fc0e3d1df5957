//! Tool configuration
//!
//! Defaults are compiled in; `<workspace>/mech.toml` and `MECH__*` environment
//! variables override them, in that order.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "mech.toml";
pub const DEFAULT_WORKSPACE_DIR: &str = ".operate-mech";
pub const DEFAULT_IPFS_NODE: &str = "/dns/registry.autonolas.tech/tcp/443/https";
pub const DEFAULT_OFFCHAIN_URL: &str = "http://localhost:8000/";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MechConfig {
    /// Workspace root; `~/.operate-mech` when unset
    pub workspace_root: Option<PathBuf>,
    /// IPFS HTTP API, as URL or multiaddr
    pub ipfs_node: String,
    pub mech_offchain_url: String,
    /// Gas handed to the inner Safe call
    pub safe_tx_gas: u64,
    /// Gas limit of the outer `execTransaction`
    pub exec_gas_limit: u64,
    /// Fixed gas price, not market-sampled
    pub gas_price_gwei: u64,
    /// External platform executable used to build the service
    pub operate_command: String,
    pub operate_build_args: Vec<String>,
}

impl Default for MechConfig {
    fn default() -> Self {
        MechConfig {
            workspace_root: None,
            ipfs_node: DEFAULT_IPFS_NODE.to_string(),
            mech_offchain_url: DEFAULT_OFFCHAIN_URL.to_string(),
            safe_tx_gas: 100_000,
            exec_gas_limit: 300_000,
            gas_price_gwei: 3,
            operate_command: "operate".to_string(),
            operate_build_args: vec!["quickstart".to_string(), "--build-only".to_string()],
        }
    }
}

impl MechConfig {
    /// Load defaults, then the optional config file, then `MECH__*` variables.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigurationError> {
        let defaults = config::Config::try_from(&MechConfig::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = config_file {
            builder = builder.add_source(config::File::from(path.to_path_buf()).required(false));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("MECH")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(" ")
                    .with_list_parse_key("operate_build_args")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Resolve the workspace root, falling back to `$HOME/.operate-mech`.
    pub fn resolve_workspace_root(&self) -> Result<PathBuf, ConfigurationError> {
        if let Some(root) = &self.workspace_root {
            return Ok(root.clone());
        }
        default_workspace_root()
    }
}

pub fn default_workspace_root() -> Result<PathBuf, ConfigurationError> {
    let home = std::env::var_os("HOME").ok_or_else(|| ConfigurationError::MissingVariable("HOME".to_string()))?;
    Ok(PathBuf::from(home).join(DEFAULT_WORKSPACE_DIR))
}
