//! Safe multisig over ethers
//!
//! Single-owner flow: the agent key both signs the Safe transaction hash and
//! pays for `execTransaction`.

use super::{ChainSubmitError, MultisigWallet, ReceiptSummary, SafeTransaction, WalletConnector, SERVICE_HASH_SIGNATURE};
use crate::keys::SignerKey;
use async_trait::async_trait;
use ethers::abi::parse_abi;
use ethers::contract::BaseContract;
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use log::{debug, info};
use std::sync::Arc;

const SAFE_ABI: [&str; 3] = [
    "function nonce() view returns (uint256)",
    "function getTransactionHash(address to, uint256 value, bytes data, uint8 operation, uint256 safeTxGas, uint256 baseGas, uint256 gasPrice, address gasToken, address refundReceiver, uint256 _nonce) view returns (bytes32)",
    "function execTransaction(address to, uint256 value, bytes data, uint8 operation, uint256 safeTxGas, uint256 baseGas, uint256 gasPrice, address gasToken, address refundReceiver, bytes signatures) payable returns (bool)",
];

const GWEI: u64 = 1_000_000_000;

/// Opens [`SafeWallet`]s with a fixed outer gas policy.
pub struct EthersConnector {
    exec_gas_limit: u64,
    gas_price_gwei: u64,
}

impl EthersConnector {
    pub fn new(exec_gas_limit: u64, gas_price_gwei: u64) -> Self {
        Self {
            exec_gas_limit,
            gas_price_gwei,
        }
    }
}

#[async_trait]
impl WalletConnector for EthersConnector {
    async fn connect(
        &self,
        rpc_url: &str,
        chain_id: u64,
        signer: &SignerKey,
    ) -> Result<Arc<dyn MultisigWallet>, ChainSubmitError> {
        let provider = Provider::<Http>::try_from(rpc_url).map_err(|e| ChainSubmitError::Provider {
            url: rpc_url.to_string(),
            reason: e.to_string(),
        })?;
        let wallet = signer
            .wallet()
            .map_err(|e| ChainSubmitError::Signing(e.to_string()))?
            .with_chain_id(chain_id);
        let safe_abi = BaseContract::from(parse_abi(&SAFE_ABI).map_err(|e| ChainSubmitError::Encoding(e.to_string()))?);
        let service_abi =
            BaseContract::from(parse_abi(&[SERVICE_HASH_SIGNATURE]).map_err(|e| ChainSubmitError::Encoding(e.to_string()))?);

        debug!("Connected to chain {} as {:?}", chain_id, wallet.address());
        Ok(Arc::new(SafeWallet {
            client: SignerMiddleware::new(provider.clone(), wallet),
            provider,
            safe_abi,
            service_abi,
            exec_gas_limit: self.exec_gas_limit,
            gas_price: U256::from(self.gas_price_gwei) * U256::from(GWEI),
        }))
    }
}

pub struct SafeWallet {
    provider: Provider<Http>,
    client: SignerMiddleware<Provider<Http>, LocalWallet>,
    safe_abi: BaseContract,
    service_abi: BaseContract,
    exec_gas_limit: u64,
    gas_price: U256,
}

impl SafeWallet {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ProviderError> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        self.provider.call(&tx, None).await
    }

    async fn safe_tx_hash(&self, tx: &SafeTransaction) -> Result<H256, ChainSubmitError> {
        let data = self.safe_abi.encode(
            "getTransactionHash",
            (
                tx.to,
                tx.value,
                tx.data.clone(),
                tx.operation,
                tx.safe_tx_gas,
                tx.base_gas,
                tx.gas_price,
                tx.gas_token,
                tx.refund_receiver,
                tx.nonce,
            ),
        )?;
        let output = self
            .call(tx.safe, data)
            .await
            .map_err(|e| ChainSubmitError::Signing(format!("getTransactionHash failed: {}", e)))?;
        Ok(self.safe_abi.decode_output("getTransactionHash", output)?)
    }
}

#[async_trait]
impl MultisigWallet for SafeWallet {
    async fn retrieve_nonce(&self, safe: Address) -> Result<U256, ChainSubmitError> {
        let data = self.safe_abi.encode("nonce", ())?;
        let output = self
            .call(safe, data)
            .await
            .map_err(|e| ChainSubmitError::Nonce(e.to_string()))?;
        Ok(self.safe_abi.decode_output("nonce", output)?)
    }

    async fn read_service_hash(&self, contract: Address, service_id: U256) -> Result<H256, ChainSubmitError> {
        let data = self.service_abi.encode("mapServiceHashes", service_id)?;
        let output = self.call(contract, data).await.map_err(|e| ChainSubmitError::Provider {
            url: self.provider.url().to_string(),
            reason: e.to_string(),
        })?;
        Ok(self.service_abi.decode_output("mapServiceHashes", output)?)
    }

    async fn build_sign_execute(&self, tx: &SafeTransaction) -> Result<H256, ChainSubmitError> {
        let safe_tx_hash = self.safe_tx_hash(tx).await?;
        let signature = self
            .client
            .signer()
            .sign_hash(safe_tx_hash)
            .map_err(|e| ChainSubmitError::Signing(e.to_string()))?;

        let data = self.safe_abi.encode(
            "execTransaction",
            (
                tx.to,
                tx.value,
                tx.data.clone(),
                tx.operation,
                tx.safe_tx_gas,
                tx.base_gas,
                tx.gas_price,
                tx.gas_token,
                tx.refund_receiver,
                Bytes::from(signature.to_vec()),
            ),
        )?;
        let request = TransactionRequest::new()
            .to(tx.safe)
            .data(data)
            .gas(self.exec_gas_limit)
            .gas_price(self.gas_price);

        let pending = self
            .client
            .send_transaction(request, None)
            .await
            .map_err(|e| ChainSubmitError::Submission(e.to_string()))?;
        let tx_hash = pending.tx_hash();
        info!("Safe transaction sent: {:?}", tx_hash);
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: H256) -> Result<Option<ReceiptSummary>, ChainSubmitError> {
        let receipt = PendingTransaction::new(tx_hash, &self.provider)
            .await
            .map_err(|e| ChainSubmitError::Receipt(e.to_string()))?;
        Ok(receipt.map(|receipt| ReceiptSummary {
            status: receipt.status == Some(U64::from(1)),
            tx_hash: receipt.transaction_hash,
        }))
    }
}
