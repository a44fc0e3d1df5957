//! Mech runtime provisioning toolkit
//!
//! Provisions and maintains an on-chain mech service: derives the runtime
//! environment from the platform's service record, materializes signing keys,
//! assembles the tool manifest, publishes it to IPFS and writes its hash
//! on-chain through the service Safe.

pub mod chains;
pub mod config;
pub mod credentials;
pub mod env;
pub mod error;
pub mod keys;
pub mod metadata;
pub mod onchain;
pub mod publish;
pub mod service;
pub mod setup;
pub mod workspace;

pub use chains::SupportedChain;
pub use config::MechConfig;
pub use error::{
    ChainSubmitError, ConfigurationError, CredentialError, PublishError, Result, SetupError,
    ValidationError,
};
pub use setup::{Collaborators, SetupOrchestrator, SetupReport, SetupStage};
pub use workspace::WorkspaceContext;
