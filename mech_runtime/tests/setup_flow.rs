//! End-to-end setup runs against stub collaborators

use anyhow::Result;
use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use mech_runtime::credentials::{Password, PasswordPrompt, PasswordSource};
use mech_runtime::env::EnvSnapshot;
use mech_runtime::keys::{KeyDecryptor, KeyMaterial, KeyMaterialization, SignerKey};
use mech_runtime::onchain::{MultisigWallet, ReceiptSummary, SafeTransaction, WalletConnector};
use mech_runtime::publish::ContentStore;
use mech_runtime::service::{ServicePlatform, ServiceRecord};
use mech_runtime::{
    ChainSubmitError, Collaborators, ConfigurationError, CredentialError, MechConfig, PublishError, SetupError,
    SetupOrchestrator, SupportedChain, WorkspaceContext,
};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use zeroize::Zeroizing;

const AGENT_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
const AGENT_ADDRESS: &str = "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23";
const MANIFEST_CID: &str = "QmaozNR7DZHQK1ZcU9p7QdrshMvXqWK6gpu5rmrkPdT3L4";
const ENCODED_HASH: &str = "f01701220b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
const METADATA_CONTRACT: &str = "0x0598081d48fb80b0a7e52fad2905ae9becd6fc69";

fn safe_address() -> String {
    format!("0xabc{:037}", 1)
}

fn provisioned_record() -> ServiceRecord {
    serde_json::from_value(json!({
        "home_chain": "gnosis",
        "chain_configs": {
            "gnosis": {
                "ledger_config": {"rpc": "http://localhost:8545", "chain": "gnosis"},
                "chain_data": {"multisig": safe_address(), "token": 42}
            }
        },
        "env_variables": {
            "ON_CHAIN_SERVICE_ID": {"value": "null", "provision_type": "computed"},
            "MECH_TO_MAX_DELIVERY_RATE": {"value": "{\"0xMech\": \"10\"}", "provision_type": "user"},
            "COMPLEMENTARY_SERVICE_METADATA_ADDRESS": {"value": METADATA_CONTRACT, "provision_type": "fixed"}
        },
        "agent_addresses": ["0x1", "0x2"]
    }))
    .unwrap()
}

#[derive(Default)]
struct StubPlatform {
    services: Mutex<Vec<ServiceRecord>>,
    builds: AtomicUsize,
    staking: Mutex<Option<String>>,
    /// Build succeeds but no service record appears afterwards
    loses_record: bool,
}

#[async_trait]
impl ServicePlatform for StubPlatform {
    async fn list_services(&self) -> Result<Vec<ServiceRecord>, ConfigurationError> {
        Ok(self.services.lock().unwrap().clone())
    }

    async fn build_service_only(
        &self,
        config_path: &Path,
        staking_program_id: Option<&str>,
        password: &Password,
    ) -> Result<(), ConfigurationError> {
        assert!(config_path.ends_with("config/config_mech_gnosis.json"));
        assert_eq!(password.expose(), "secret");
        self.builds.fetch_add(1, Ordering::SeqCst);
        *self.staking.lock().unwrap() = staking_program_id.map(str::to_string);
        if !self.loses_record {
            self.services.lock().unwrap().push(provisioned_record());
        }
        Ok(())
    }
}

#[derive(Default)]
struct StubPrompt {
    calls: AtomicUsize,
}

impl PasswordPrompt for StubPrompt {
    fn prompt(&self, _message: &str) -> Result<Zeroizing<String>, CredentialError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Zeroizing::new("secret".to_string()))
    }
}

#[derive(Default)]
struct StubDecryptor {
    calls: AtomicUsize,
}

impl KeyDecryptor for StubDecryptor {
    fn decrypt(&self, _key_file: &Path, password: &Password) -> Result<KeyMaterial, CredentialError> {
        assert_eq!(password.expose(), "secret");
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(KeyMaterial {
            ledger: json!("ethereum"),
            address: AGENT_ADDRESS.to_string(),
            private_key: AGENT_KEY.to_string(),
        })
    }
}

#[derive(Default)]
struct StubStore {
    uploads: Mutex<Vec<Vec<u8>>>,
    /// Answer the first upload without a `Hash` field
    drops_hash_once: AtomicBool,
}

#[async_trait]
impl ContentStore for StubStore {
    async fn add(&self, _file_name: &str, bytes: Vec<u8>) -> Result<Value, PublishError> {
        self.uploads.lock().unwrap().push(bytes);
        if self.drops_hash_once.swap(false, Ordering::SeqCst) {
            return Ok(json!({"Name": "metadata.json", "Size": "11"}));
        }
        Ok(json!({"Name": "metadata.json", "Hash": MANIFEST_CID, "Size": "11"}))
    }
}

/// Contract state plus every Safe transaction executed against it
#[derive(Default)]
struct StubChain {
    service_hash: Mutex<H256>,
    executed: Mutex<Vec<SafeTransaction>>,
    reverts: bool,
}

#[async_trait]
impl MultisigWallet for StubChain {
    async fn retrieve_nonce(&self, _safe: Address) -> Result<U256, ChainSubmitError> {
        Ok(U256::from(self.executed.lock().unwrap().len()))
    }

    async fn read_service_hash(&self, _contract: Address, service_id: U256) -> Result<H256, ChainSubmitError> {
        assert_eq!(service_id, U256::from(42));
        Ok(*self.service_hash.lock().unwrap())
    }

    async fn build_sign_execute(&self, tx: &SafeTransaction) -> Result<H256, ChainSubmitError> {
        if !self.reverts {
            *self.service_hash.lock().unwrap() = H256::from_slice(&tx.data[36..68]);
        }
        self.executed.lock().unwrap().push(tx.clone());
        Ok(H256::repeat_byte(0x77))
    }

    async fn wait_for_receipt(&self, tx_hash: H256) -> Result<Option<ReceiptSummary>, ChainSubmitError> {
        Ok(Some(ReceiptSummary {
            status: !self.reverts,
            tx_hash,
        }))
    }
}

struct StubConnector {
    chain: Arc<StubChain>,
}

#[async_trait]
impl WalletConnector for StubConnector {
    async fn connect(
        &self,
        rpc_url: &str,
        chain_id: u64,
        signer: &SignerKey,
    ) -> Result<Arc<dyn MultisigWallet>, ChainSubmitError> {
        assert_eq!(rpc_url, "http://localhost:8545");
        assert_eq!(chain_id, 100);
        assert_eq!(signer.expose(), AGENT_KEY);
        Ok(self.chain.clone())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    ctx: WorkspaceContext,
    platform: Arc<StubPlatform>,
    prompt: Arc<StubPrompt>,
    decryptor: Arc<StubDecryptor>,
    store: Arc<StubStore>,
    chain: Arc<StubChain>,
    orchestrator: SetupOrchestrator,
}

fn harness(chain: StubChain) -> Result<Harness> {
    harness_with(StubPlatform::default(), StubStore::default(), chain)
}

fn harness_with(platform: StubPlatform, store: StubStore, chain: StubChain) -> Result<Harness> {
    let dir = tempfile::tempdir()?;
    let ctx = WorkspaceContext::new(dir.path());

    // Key store entry the platform created while provisioning
    let key_store = ctx.operate_dir().join("keys");
    fs::create_dir_all(&key_store)?;
    fs::write(key_store.join(AGENT_ADDRESS), "{}")?;

    let platform = Arc::new(platform);
    let prompt = Arc::new(StubPrompt::default());
    let decryptor = Arc::new(StubDecryptor::default());
    let store = Arc::new(store);
    let chain = Arc::new(chain);

    let collaborators = Collaborators {
        platform: platform.clone(),
        prompt: prompt.clone(),
        decryptor: decryptor.clone(),
        content_store: store.clone(),
        wallets: Arc::new(StubConnector { chain: chain.clone() }),
    };
    let orchestrator = SetupOrchestrator::new(ctx.clone(), MechConfig::default(), collaborators);

    Ok(Harness {
        _dir: dir,
        ctx,
        platform,
        prompt,
        decryptor,
        store,
        chain,
        orchestrator,
    })
}

fn read_env(ctx: &WorkspaceContext) -> Result<EnvSnapshot> {
    Ok(EnvSnapshot::load(&ctx.env_path())?)
}

#[tokio::test]
async fn test_full_setup_provisions_and_publishes() -> Result<()> {
    let h = harness(StubChain::default())?;
    let report = h.orchestrator.run(SupportedChain::Gnosis).await?;

    assert!(report.provisioned);
    assert_eq!(report.password_source, PasswordSource::Prompted);
    assert_eq!(h.platform.builds.load(Ordering::SeqCst), 1);
    assert_eq!(h.platform.staking.lock().unwrap().as_deref(), Some("no_staking"));
    assert_eq!(report.metadata_hash.as_str(), ENCODED_HASH);
    assert!(report.chain_update.success);
    assert_eq!(report.chain_update.tx_hash, Some(H256::repeat_byte(0x77)));

    let env = read_env(&h.ctx)?;
    assert_eq!(env.get("SAFE_CONTRACT_ADDRESS"), Some(safe_address().as_str()));
    assert_eq!(env.get("ALL_PARTICIPANTS"), Some(r#"["0x1","0x2"]"#));
    assert_eq!(env.get("MECH_TO_MAX_DELIVERY_RATE"), Some(r#"{"0xMech":10}"#));
    assert_eq!(env.get("ON_CHAIN_SERVICE_ID"), Some("42"));
    assert_eq!(env.get("GNOSIS_LEDGER_CHAIN_ID"), Some("100"));
    assert_eq!(env.get("DEFAULT_CHAIN_ID"), Some("gnosis"));
    assert_eq!(env.get("MECHX_CHAIN_RPC"), Some("http://localhost:8545"));
    assert_eq!(env.get("METADATA_HASH"), Some(ENCODED_HASH));
    assert_eq!(env.get("OPERATE_PASSWORD"), Some("secret"));

    let agent_key = fs::read_to_string(h.ctx.keys_dir().join("ethereum_private_key.txt"))?;
    assert_eq!(agent_key, AGENT_KEY);
    let service_keys: Value = serde_json::from_str(&fs::read_to_string(h.ctx.keys_dir().join("keys.json"))?)?;
    assert_eq!(service_keys[0]["address"], AGENT_ADDRESS);

    let uploaded: Value = serde_json::from_slice(&h.store.uploads.lock().unwrap()[0])?;
    assert_eq!(uploaded["tools"], json!(["echo"]));

    let executed = h.chain.executed.lock().unwrap();
    assert_eq!(executed.len(), 1);
    assert_eq!(format!("{:?}", executed[0].safe), safe_address());
    assert_eq!(format!("{:?}", executed[0].to), METADATA_CONTRACT);
    Ok(())
}

#[tokio::test]
async fn test_rerun_is_idempotent() -> Result<()> {
    let h = harness(StubChain::default())?;
    h.orchestrator.run(SupportedChain::Gnosis).await?;
    let env_after_first = fs::read_to_string(h.ctx.env_path())?;
    let agent_key_path = h.ctx.keys_dir().join("ethereum_private_key.txt");
    let key_modified = fs::metadata(&agent_key_path)?.modified()?;

    let report = h.orchestrator.run(SupportedChain::Gnosis).await?;

    assert!(!report.provisioned);
    assert_eq!(report.password_source, PasswordSource::Persisted);
    assert_eq!(h.platform.builds.load(Ordering::SeqCst), 1);
    assert_eq!(h.prompt.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.decryptor.calls.load(Ordering::SeqCst), 1);
    assert!(matches!(
        report.keys,
        KeyMaterialization::Materialized { agent_key, service_key, .. }
            if !agent_key.created() && !service_key.created()
    ));
    assert_eq!(fs::metadata(&agent_key_path)?.modified()?, key_modified);
    assert_eq!(fs::read_to_string(h.ctx.env_path())?, env_after_first);

    // The contract already holds the hash from the first run
    assert!(report.chain_update.already_applied);
    assert_eq!(h.chain.executed.lock().unwrap().len(), 1);
    Ok(())
}

fn entries_without(env: &EnvSnapshot, skip: &str) -> Vec<(String, String)> {
    env.entries()
        .filter(|(key, _)| *key != skip)
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

#[tokio::test]
async fn test_rerun_after_failed_publish_resumes() -> Result<()> {
    let h = harness_with(
        StubPlatform::default(),
        StubStore {
            drops_hash_once: AtomicBool::new(true),
            ..Default::default()
        },
        StubChain::default(),
    )?;

    let err = h.orchestrator.run(SupportedChain::Gnosis).await.unwrap_err();
    assert!(matches!(err, SetupError::Publish(PublishError::MissingKey("Hash"))));
    assert!(h.chain.executed.lock().unwrap().is_empty());
    let env_after_failure = read_env(&h.ctx)?;
    assert_eq!(env_after_failure.non_empty("METADATA_HASH"), None);

    let report = h.orchestrator.run(SupportedChain::Gnosis).await?;

    assert!(!report.provisioned);
    assert_eq!(report.password_source, PasswordSource::Persisted);
    assert_eq!(h.platform.builds.load(Ordering::SeqCst), 1);
    assert_eq!(h.prompt.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.decryptor.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.uploads.lock().unwrap().len(), 2);
    assert!(report.chain_update.success && !report.chain_update.already_applied);
    assert_eq!(h.chain.executed.lock().unwrap().len(), 1);

    let env = read_env(&h.ctx)?;
    assert_eq!(env.get("METADATA_HASH"), Some(ENCODED_HASH));
    assert_eq!(
        entries_without(&env, "METADATA_HASH"),
        entries_without(&env_after_failure, "METADATA_HASH")
    );
    Ok(())
}

#[tokio::test]
async fn test_missing_record_after_provisioning_is_an_error() -> Result<()> {
    let h = harness_with(
        StubPlatform {
            loses_record: true,
            ..Default::default()
        },
        StubStore::default(),
        StubChain::default(),
    )?;

    let err = h.orchestrator.run(SupportedChain::Gnosis).await.unwrap_err();
    assert!(matches!(err, SetupError::Configuration(ConfigurationError::ServiceNotFound)));
    assert_eq!(h.platform.builds.load(Ordering::SeqCst), 1);
    assert!(h.store.uploads.lock().unwrap().is_empty());
    assert!(!h.ctx.keys_dir().join("ethereum_private_key.txt").exists());
    Ok(())
}

#[tokio::test]
async fn test_persisted_password_survives_derivation() -> Result<()> {
    let h = harness(StubChain::default())?;
    mech_runtime::workspace::initialize_workspace(&h.ctx, false)?;
    fs::write(h.ctx.env_path(), "OPERATE_PASSWORD=secret\nSTALE_SETTING=keep-me\n")?;

    h.orchestrator.run(SupportedChain::Gnosis).await?;

    assert_eq!(h.prompt.calls.load(Ordering::SeqCst), 0);
    let env = read_env(&h.ctx)?;
    assert_eq!(env.get("OPERATE_PASSWORD"), Some("secret"));
    assert_eq!(env.get("STALE_SETTING"), Some("keep-me"));
    Ok(())
}

#[tokio::test]
async fn test_duplicate_tool_keeps_first_package() -> Result<()> {
    let h = harness(StubChain::default())?;
    mech_runtime::workspace::initialize_workspace(&h.ctx, false)?;
    let alice = h.ctx.packages_dir().join("alice/customs/echo");
    fs::create_dir_all(&alice)?;
    fs::write(
        alice.join("component.yaml"),
        "name: alice_echo\nauthor: alice\ndescription: Echo, first in line\nallowed_tools:\n- echo\n",
    )?;

    let manifest = h.orchestrator.generate_metadata()?;

    assert_eq!(manifest.tools, vec!["echo"]);
    let written: Value = serde_json::from_str(&fs::read_to_string(h.ctx.metadata_path())?)?;
    assert_eq!(written["tools"], json!(["echo"]));
    assert_eq!(written["toolMetadata"]["echo"]["name"], "alice_echo");
    assert_eq!(written["toolMetadata"].as_object().map(|m| m.len()), Some(1));
    Ok(())
}

#[tokio::test]
async fn test_missing_chain_template_aborts_before_credentials() -> Result<()> {
    let h = harness(StubChain::default())?;
    mech_runtime::workspace::initialize_workspace(&h.ctx, false)?;
    fs::remove_file(h.ctx.chain_template_path(SupportedChain::Base))?;

    let err = h.orchestrator.run(SupportedChain::Base).await.unwrap_err();
    assert!(matches!(
        err,
        SetupError::Configuration(ConfigurationError::MissingFile { what: "template config", .. })
    ));
    assert_eq!(h.prompt.calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn test_reverted_update_is_reported_not_raised() -> Result<()> {
    let h = harness(StubChain {
        reverts: true,
        ..Default::default()
    })?;
    let report = h.orchestrator.run(SupportedChain::Gnosis).await?;
    assert!(!report.chain_update.success);
    assert_eq!(report.chain_update.tx_hash, Some(H256::repeat_byte(0x77)));
    Ok(())
}

#[tokio::test]
async fn test_standalone_push_then_update() -> Result<()> {
    let h = harness(StubChain::default())?;
    h.orchestrator.run(SupportedChain::Gnosis).await?;

    let hash = h.orchestrator.push_metadata().await?;
    assert_eq!(hash.as_str(), ENCODED_HASH);
    assert_eq!(h.store.uploads.lock().unwrap().len(), 2);

    let result = h.orchestrator.update_metadata().await?;
    assert!(result.success && result.already_applied);
    Ok(())
}

#[tokio::test]
async fn test_update_with_empty_agent_key_is_a_credential_error() -> Result<()> {
    let h = harness(StubChain::default())?;
    h.orchestrator.run(SupportedChain::Gnosis).await?;
    fs::write(h.ctx.keys_dir().join("ethereum_private_key.txt"), "\n")?;

    let err = h.orchestrator.update_metadata().await.unwrap_err();
    assert!(matches!(err, SetupError::Credential(CredentialError::EmptyPrivateKey(_))));
    Ok(())
}

#[tokio::test]
async fn test_concurrent_run_is_rejected() -> Result<()> {
    let h = harness(StubChain::default())?;
    let _held = mech_runtime::workspace::WorkspaceLock::acquire(&h.ctx)?;

    let err = h.orchestrator.run(SupportedChain::Gnosis).await.unwrap_err();
    assert!(matches!(err, SetupError::Configuration(ConfigurationError::WorkspaceBusy(_))));
    Ok(())
}
