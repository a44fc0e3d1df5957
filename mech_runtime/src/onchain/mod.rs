//! Chain update submitter
//!
//! Writes the published metadata hash to the complementary service metadata
//! contract through the service's Safe multisig. The submitter only builds
//! calldata and drives the [`MultisigWallet`] collaborator; the ethers-backed
//! wallet lives in [`safe`].

pub mod safe;

use crate::env::EnvSnapshot;
use crate::error::ConfigurationError;
use crate::keys::SignerKey;
use crate::publish::{PublishError, PublishedHash};
use async_trait::async_trait;
use ethers::abi::{parse_abi, AbiError};
use ethers::contract::BaseContract;
use ethers::types::{Address, Bytes, H256, U256};
use log::{info, warn};
use std::sync::Arc;
use thiserror::Error;

pub use safe::EthersConnector;

pub const CHANGE_HASH_SIGNATURE: &str = "function changeHash(uint256 serviceId, bytes32 hash)";
pub const SERVICE_HASH_SIGNATURE: &str = "function mapServiceHashes(uint256 serviceId) view returns (bytes32)";

/// Safe `Enum.Operation.Call`
pub const OPERATION_CALL: u8 = 0;

#[derive(Error, Debug)]
pub enum ChainSubmitError {
    #[error("Invalid metadata hash: {0}")]
    InvalidHash(#[source] PublishError),

    #[error("Failed to connect to {url}: {reason}")]
    Provider { url: String, reason: String },

    #[error("Failed to read Safe nonce: {0}")]
    Nonce(String),

    #[error("Failed to encode contract call: {0}")]
    Encoding(String),

    #[error("Failed to sign Safe transaction: {0}")]
    Signing(String),

    #[error("Exception while sending a safe transaction: {0}")]
    Submission(String),

    #[error("Failed waiting for transaction receipt: {0}")]
    Receipt(String),

    #[error("Safe transaction execution failed; no transaction receipt returned.")]
    MissingReceipt,
}

impl From<AbiError> for ChainSubmitError {
    fn from(e: AbiError) -> Self {
        ChainSubmitError::Encoding(e.to_string())
    }
}

/// Parameters of a Safe `execTransaction`
#[derive(Debug, Clone, PartialEq)]
pub struct SafeTransaction {
    pub safe: Address,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub operation: u8,
    pub safe_tx_gas: U256,
    pub base_gas: U256,
    pub gas_price: U256,
    pub gas_token: Address,
    pub refund_receiver: Address,
    pub nonce: U256,
}

impl SafeTransaction {
    /// A plain call with no refund and no gas token.
    pub fn call(safe: Address, to: Address, data: Bytes, safe_tx_gas: u64, nonce: U256) -> Self {
        Self {
            safe,
            to,
            value: U256::zero(),
            data,
            operation: OPERATION_CALL,
            safe_tx_gas: U256::from(safe_tx_gas),
            base_gas: U256::zero(),
            gas_price: U256::zero(),
            gas_token: Address::zero(),
            refund_receiver: Address::zero(),
            nonce,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptSummary {
    pub status: bool,
    pub tx_hash: H256,
}

/// Multisig wallet SDK collaborator
#[async_trait]
pub trait MultisigWallet: Send + Sync {
    async fn retrieve_nonce(&self, safe: Address) -> Result<U256, ChainSubmitError>;

    /// Current hash the contract holds for `service_id`
    async fn read_service_hash(&self, contract: Address, service_id: U256) -> Result<H256, ChainSubmitError>;

    /// Build, sign and execute; returns the outer transaction hash.
    async fn build_sign_execute(&self, tx: &SafeTransaction) -> Result<H256, ChainSubmitError>;

    async fn wait_for_receipt(&self, tx_hash: H256) -> Result<Option<ReceiptSummary>, ChainSubmitError>;
}

/// Opens a [`MultisigWallet`] for one chain and signer.
#[async_trait]
pub trait WalletConnector: Send + Sync {
    async fn connect(
        &self,
        rpc_url: &str,
        chain_id: u64,
        signer: &SignerKey,
    ) -> Result<Arc<dyn MultisigWallet>, ChainSubmitError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainUpdateResult {
    pub success: bool,
    pub tx_hash: Option<H256>,
    /// The contract already held the hash; nothing was sent.
    pub already_applied: bool,
}

/// Everything an update needs, read from the environment snapshot
#[derive(Debug, Clone)]
pub struct ChainUpdateSettings {
    pub chain: String,
    pub rpc_url: String,
    pub chain_id: u64,
    pub contract: Address,
    pub metadata_hash: String,
    pub service_id: U256,
    pub safe: Address,
}

impl ChainUpdateSettings {
    pub fn from_snapshot(snapshot: &EnvSnapshot) -> Result<Self, ConfigurationError> {
        let require = |key: &str| -> Result<String, ConfigurationError> {
            snapshot
                .non_empty(key)
                .map(|v| v.trim().to_string())
                .ok_or_else(|| ConfigurationError::MissingVariable(key.to_string()))
        };

        let chain = require("DEFAULT_CHAIN_ID")?.to_uppercase();
        let rpc_url = require(&format!("{}_LEDGER_RPC_0", chain))?;
        let chain_id_var = format!("{}_LEDGER_CHAIN_ID", chain);
        let chain_id = require(&chain_id_var)?
            .parse::<u64>()
            .map_err(|e| invalid(&chain_id_var, e))?;
        let contract = parse_address("COMPLEMENTARY_SERVICE_METADATA_ADDRESS", &require("COMPLEMENTARY_SERVICE_METADATA_ADDRESS")?)?;
        let metadata_hash = require("METADATA_HASH")?;
        let service_id = U256::from_dec_str(&require("ON_CHAIN_SERVICE_ID")?)
            .map_err(|e| invalid("ON_CHAIN_SERVICE_ID", e))?;
        let safe = parse_address("SAFE_CONTRACT_ADDRESS", &require("SAFE_CONTRACT_ADDRESS")?)?;

        Ok(Self {
            chain,
            rpc_url,
            chain_id,
            contract,
            metadata_hash,
            service_id,
            safe,
        })
    }
}

fn invalid(key: &str, reason: impl ToString) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_address(key: &str, value: &str) -> Result<Address, ConfigurationError> {
    value.parse::<Address>().map_err(|e| invalid(key, e))
}

/// ABI-encoded `changeHash(serviceId, hash)`
pub fn change_hash_calldata(service_id: U256, hash: &PublishedHash) -> Result<Bytes, ChainSubmitError> {
    let contract = BaseContract::from(parse_abi(&[CHANGE_HASH_SIGNATURE]).map_err(|e| ChainSubmitError::Encoding(e.to_string()))?);
    Ok(contract.encode("changeHash", (service_id, H256::from(hash.digest())))?)
}

pub struct ChainUpdateSubmitter {
    wallet: Arc<dyn MultisigWallet>,
    safe_tx_gas: u64,
}

impl ChainUpdateSubmitter {
    pub fn new(wallet: Arc<dyn MultisigWallet>, safe_tx_gas: u64) -> Self {
        Self { wallet, safe_tx_gas }
    }

    pub async fn submit_update(&self, settings: &ChainUpdateSettings) -> Result<ChainUpdateResult, ChainSubmitError> {
        let hash = PublishedHash::parse(&settings.metadata_hash).map_err(ChainSubmitError::InvalidHash)?;
        let digest = H256::from(hash.digest());

        // An earlier run may have landed without us seeing the receipt
        match self.wallet.read_service_hash(settings.contract, settings.service_id).await {
            Ok(current) if current == digest => {
                info!(
                    "Service {} already points to {}, skipping chain update",
                    settings.service_id, hash
                );
                return Ok(ChainUpdateResult {
                    success: true,
                    tx_hash: None,
                    already_applied: true,
                });
            }
            Ok(_) => {}
            Err(e) => warn!("Could not read current metadata hash, submitting anyway: {}", e),
        }

        let nonce = self.wallet.retrieve_nonce(settings.safe).await?;
        let data = change_hash_calldata(settings.service_id, &hash)?;
        let tx = SafeTransaction::call(settings.safe, settings.contract, data, self.safe_tx_gas, nonce);

        info!(
            "Submitting metadata hash {} for service {} via Safe {:?} (nonce {})",
            hash, settings.service_id, settings.safe, nonce
        );
        let tx_hash = self.wallet.build_sign_execute(&tx).await?;
        let receipt = self
            .wallet
            .wait_for_receipt(tx_hash)
            .await?
            .ok_or(ChainSubmitError::MissingReceipt)?;

        Ok(ChainUpdateResult {
            success: receipt.status,
            tx_hash: Some(receipt.tx_hash),
            already_applied: false,
        })
    }
}
