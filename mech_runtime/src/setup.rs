//! Setup orchestrator
//!
//! Drives one chain through
//! `WorkspaceBootstrap -> CredentialResolution -> ServiceProvisionCheck ->
//! [ProvisionIfNeeded] -> EnvironmentDerivation -> KeyMaterialization ->
//! ManifestGeneration -> ManifestPublish -> ChainUpdate -> Complete`.
//!
//! There is no resume cursor. Each stage checks whether its work is already
//! done, so a failed run is retried by running the whole pipeline again. The
//! decrypted password travels as an argument, never through the process
//! environment.

use crate::chains::SupportedChain;
use crate::config::MechConfig;
use crate::credentials::{resolve_password, PasswordPrompt, PasswordSource, TerminalPrompt};
use crate::env::{derive_environment, EnvSnapshot};
use crate::error::{ConfigurationError, Result};
use crate::keys::{load_signer_key, materialize_keys, KeyDecryptor, KeyMaterialization, KeystoreDecryptor, AGENT_KEY_FILE};
use crate::metadata::{self, validate::validate_file, Manifest};
use crate::onchain::{ChainUpdateResult, ChainUpdateSettings, ChainUpdateSubmitter, EthersConnector, WalletConnector};
use crate::publish::{ContentPublisher, ContentStore, IpfsHttpStore, PublishedHash};
use crate::service::{needs_provisioning, normalize_service_files, staking_program_id, OperatePlatform, ServicePlatform, ServiceRecord};
use crate::workspace::{bootstrap::ENV_TEMPLATE, initialize_workspace, read_to_string, WorkspaceContext, WorkspaceLock};
use log::{debug, info, warn};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Snapshot key holding the encoded manifest hash
pub const METADATA_HASH_KEY: &str = "METADATA_HASH";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    WorkspaceBootstrap,
    CredentialResolution,
    ServiceProvisionCheck,
    ProvisionIfNeeded,
    EnvironmentDerivation,
    KeyMaterialization,
    ManifestGeneration,
    ManifestPublish,
    ChainUpdate,
    Complete,
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SetupStage::WorkspaceBootstrap => "workspace bootstrap",
            SetupStage::CredentialResolution => "credential resolution",
            SetupStage::ServiceProvisionCheck => "service provision check",
            SetupStage::ProvisionIfNeeded => "service provisioning",
            SetupStage::EnvironmentDerivation => "environment derivation",
            SetupStage::KeyMaterialization => "key materialization",
            SetupStage::ManifestGeneration => "manifest generation",
            SetupStage::ManifestPublish => "manifest publish",
            SetupStage::ChainUpdate => "chain update",
            SetupStage::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// External systems the orchestrator talks to
#[derive(Clone)]
pub struct Collaborators {
    pub platform: Arc<dyn ServicePlatform>,
    pub prompt: Arc<dyn PasswordPrompt>,
    pub decryptor: Arc<dyn KeyDecryptor>,
    pub content_store: Arc<dyn ContentStore>,
    pub wallets: Arc<dyn WalletConnector>,
}

impl Collaborators {
    /// `operate` CLI, terminal prompt, keystore files, IPFS HTTP API and ethers.
    pub fn production(ctx: &WorkspaceContext, config: &MechConfig) -> Result<Self> {
        Ok(Self {
            platform: Arc::new(OperatePlatform::new(
                ctx.root(),
                ctx.operate_dir(),
                config.operate_command.clone(),
                config.operate_build_args.clone(),
            )),
            prompt: Arc::new(TerminalPrompt),
            decryptor: Arc::new(KeystoreDecryptor),
            content_store: Arc::new(IpfsHttpStore::new(&config.ipfs_node)?),
            wallets: Arc::new(EthersConnector::new(config.exec_gas_limit, config.gas_price_gwei)),
        })
    }
}

/// Outcome of a full setup run
#[derive(Debug, Clone)]
pub struct SetupReport {
    pub chain: SupportedChain,
    pub password_source: PasswordSource,
    /// The service had to be built during this run
    pub provisioned: bool,
    pub keys: KeyMaterialization,
    pub tool_count: usize,
    pub metadata_hash: PublishedHash,
    pub chain_update: ChainUpdateResult,
}

pub struct SetupOrchestrator {
    ctx: WorkspaceContext,
    config: MechConfig,
    collaborators: Collaborators,
}

impl SetupOrchestrator {
    pub fn new(ctx: WorkspaceContext, config: MechConfig, collaborators: Collaborators) -> Self {
        Self {
            ctx,
            config,
            collaborators,
        }
    }

    pub fn context(&self) -> &WorkspaceContext {
        &self.ctx
    }

    /// Run the whole pipeline for `chain`. Any stage error aborts the run;
    /// completed stages are left in place.
    pub async fn run(&self, chain: SupportedChain) -> Result<SetupReport> {
        let _lock = WorkspaceLock::acquire(&self.ctx)?;
        info!("Setting up mech for chain {} in {}", chain, self.ctx.root().display());

        enter(SetupStage::WorkspaceBootstrap);
        if self.ctx.is_initialized() {
            debug!("Workspace already initialized");
        } else {
            initialize_workspace(&self.ctx, false)?;
        }
        let template_path = self.ctx.chain_template_path(chain);
        if !template_path.is_file() {
            return Err(ConfigurationError::MissingFile {
                what: "template config",
                path: template_path,
            }
            .into());
        }

        enter(SetupStage::CredentialResolution);
        let (password, password_source) = resolve_password(&self.ctx.env_path(), self.collaborators.prompt.as_ref())?;

        enter(SetupStage::ServiceProvisionCheck);
        let platform = &self.collaborators.platform;
        let mut services = platform.list_services().await?;
        let provisioned = needs_provisioning(&services);
        if provisioned {
            enter(SetupStage::ProvisionIfNeeded);
            let changed = normalize_service_files(&template_path, &self.ctx.operate_dir())?;
            debug!("Normalized {} service config(s)", changed.len());
            let staking = staking_program_id(&read_json(&template_path)?, chain.as_str());
            platform
                .build_service_only(&template_path, staking.as_deref(), &password)
                .await?;
            services = platform.list_services().await?;
        } else {
            info!("Service already provisioned, skipping build");
        }

        enter(SetupStage::EnvironmentDerivation);
        let record = services.into_iter().next().ok_or(ConfigurationError::ServiceNotFound)?;
        self.derive_env(&record)?;

        enter(SetupStage::KeyMaterialization);
        let keys = materialize_keys(&self.ctx, self.collaborators.decryptor.as_ref(), &password)?;

        enter(SetupStage::ManifestGeneration);
        let manifest = self.generate_metadata()?;

        enter(SetupStage::ManifestPublish);
        let metadata_hash = self.publish_manifest().await?;

        enter(SetupStage::ChainUpdate);
        let chain_update = self.chain_update().await?;
        report_update(&chain_update);

        enter(SetupStage::Complete);
        Ok(SetupReport {
            chain,
            password_source,
            provisioned,
            keys,
            tool_count: manifest.tools.len(),
            metadata_hash,
            chain_update,
        })
    }

    /// Assemble the manifest from the package registry and write it.
    pub fn generate_metadata(&self) -> Result<Manifest> {
        Ok(metadata::generate_metadata(
            &self.ctx.packages_dir(),
            &self.ctx.metadata_path(),
        )?)
    }

    /// Generate, validate and publish the manifest, then persist its hash.
    pub async fn push_metadata(&self) -> Result<PublishedHash> {
        self.ctx.require_initialized()?;
        let _lock = WorkspaceLock::acquire(&self.ctx)?;
        self.generate_metadata()?;
        self.publish_manifest().await
    }

    /// Write the persisted hash on-chain.
    pub async fn update_metadata(&self) -> Result<ChainUpdateResult> {
        self.ctx.require_initialized()?;
        let _lock = WorkspaceLock::acquire(&self.ctx)?;
        let result = self.chain_update().await?;
        report_update(&result);
        Ok(result)
    }

    fn derive_env(&self, record: &ServiceRecord) -> Result<()> {
        let template_path = self.ctx.env_template_path();
        let template = if template_path.is_file() {
            EnvSnapshot::load(&template_path)?
        } else {
            debug!("{} not found, using the packaged template", template_path.display());
            EnvSnapshot::parse(ENV_TEMPLATE)
        };
        let env_path = self.ctx.env_path();
        let previous = EnvSnapshot::load(&env_path)?;
        let derived = derive_environment(record, &template, &previous, &self.config.mech_offchain_url)?;
        derived.save(&env_path)?;
        info!("Environment written to {}", env_path.display());
        Ok(())
    }

    /// Validate the manifest file on disk and publish it. Validation gates
    /// publication: only a [`ValidatedManifest`](crate::metadata::ValidatedManifest)
    /// can be published.
    async fn publish_manifest(&self) -> Result<PublishedHash> {
        let validated = validate_file(&self.ctx.metadata_path())?;
        info!("Metadata validated with {} tool(s)", validated.tool_count());

        let publisher = ContentPublisher::new(self.collaborators.content_store.clone());
        let hash = publisher.publish(&validated).await?;

        let env_path = self.ctx.env_path();
        let mut snapshot = EnvSnapshot::load(&env_path)?;
        snapshot.set(METADATA_HASH_KEY, hash.as_str());
        snapshot.save(&env_path)?;
        info!("{} stored in {}", METADATA_HASH_KEY, env_path.display());
        Ok(hash)
    }

    async fn chain_update(&self) -> Result<ChainUpdateResult> {
        let snapshot = EnvSnapshot::load(&self.ctx.env_path())?;
        let settings = ChainUpdateSettings::from_snapshot(&snapshot)?;
        let signer = load_signer_key(&self.ctx.keys_dir().join(AGENT_KEY_FILE))?;

        let wallet = self
            .collaborators
            .wallets
            .connect(&settings.rpc_url, settings.chain_id, &signer)
            .await?;
        let submitter = ChainUpdateSubmitter::new(wallet, self.config.safe_tx_gas);
        Ok(submitter.submit_update(&settings).await?)
    }
}

fn enter(stage: SetupStage) {
    info!("==> {}", stage);
}

fn report_update(result: &ChainUpdateResult) {
    match (result.success, result.already_applied, result.tx_hash) {
        (true, true, _) => info!("Metadata hash already on-chain, nothing to do"),
        (true, false, Some(tx)) => info!("Metadata hash updated on-chain in transaction {:?}", tx),
        (true, false, None) => info!("Metadata hash updated on-chain"),
        (false, _, Some(tx)) => warn!("Metadata hash update transaction {:?} reverted", tx),
        (false, _, None) => warn!("Metadata hash update failed"),
    }
}

fn read_json(path: &Path) -> std::result::Result<Value, ConfigurationError> {
    serde_json::from_str(&read_to_string(path)?).map_err(|e| ConfigurationError::json(path, e))
}
