use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mech_runtime::config::MechConfig;
use mech_runtime::workspace::initialize_workspace;
use mech_runtime::{Collaborators, SetupOrchestrator, SupportedChain, WorkspaceContext};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mtd", version, about = "Provision a mech service and publish its tool metadata")]
struct Cli {
    /// Workspace root (defaults to ~/.operate-mech)
    #[arg(long, global = true, env = "MECH_WORKSPACE")]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the workspace layout from the packaged templates
    Init {
        /// Overwrite templates and reset the package registry
        #[arg(long)]
        force: bool,
    },
    /// Provision the service and publish its metadata on one chain
    Setup {
        /// gnosis, base, polygon or optimism
        #[arg(long)]
        chain: SupportedChain,
    },
    /// Assemble metadata.json from the package registry
    GenerateMetadata,
    /// Publish metadata.json to IPFS and store its hash in .env
    PushMetadata,
    /// Write the stored metadata hash to the metadata contract
    UpdateMetadata,
}

fn load_config(workspace: Option<PathBuf>) -> Result<(WorkspaceContext, MechConfig)> {
    let base = MechConfig::load(None).context("Failed to load configuration")?;
    let root = match workspace {
        Some(root) => root,
        None => base.resolve_workspace_root()?,
    };
    let ctx = WorkspaceContext::new(root);

    let config_file = ctx.config_file_path();
    let mut config = MechConfig::load(Some(config_file.as_path())).context("Failed to load configuration")?;
    config.workspace_root = Some(ctx.root().to_path_buf());
    Ok((ctx, config))
}

fn build_orchestrator(ctx: WorkspaceContext, config: MechConfig) -> Result<SetupOrchestrator> {
    let collaborators = Collaborators::production(&ctx, &config)?;
    Ok(SetupOrchestrator::new(ctx, config, collaborators))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let (ctx, config) = load_config(cli.workspace)?;

    match cli.command {
        Commands::Init { force } => {
            let report = initialize_workspace(&ctx, force)?;
            println!(
                "Workspace ready at {} ({} written, {} kept)",
                ctx.root().display(),
                report.written.len(),
                report.skipped.len()
            );
        }
        Commands::Setup { chain } => {
            let report = build_orchestrator(ctx, config)?.run(chain).await?;
            println!("Mech setup complete for {}", report.chain);
            println!("  tools:         {}", report.tool_count);
            println!("  metadata hash: {}", report.metadata_hash);
            match (report.chain_update.success, report.chain_update.tx_hash) {
                (true, Some(tx)) => println!("  transaction:   {:?}", tx),
                (true, None) => println!("  transaction:   none (hash already on-chain)"),
                (false, tx) => println!("  transaction:   {:?} FAILED", tx),
            }
        }
        Commands::GenerateMetadata => {
            let orchestrator = build_orchestrator(ctx, config)?;
            let manifest = orchestrator.generate_metadata()?;
            println!(
                "Metadata with {} tool(s) written to {}",
                manifest.tools.len(),
                orchestrator.context().metadata_path().display()
            );
        }
        Commands::PushMetadata => {
            let hash = build_orchestrator(ctx, config)?.push_metadata().await?;
            println!("Metadata hash: {}", hash);
        }
        Commands::UpdateMetadata => {
            let result = build_orchestrator(ctx, config)?.update_metadata().await?;
            if !result.success {
                anyhow::bail!("Metadata hash update failed: {:?}", result.tx_hash);
            }
            println!("Metadata hash updated on-chain");
        }
    }

    Ok(())
}
