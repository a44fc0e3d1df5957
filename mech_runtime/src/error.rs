//! Error taxonomy for the setup pipeline
//!
//! Every stage reports one of five failure classes. Only the manifest
//! assembler swallows errors (per-package, logged and skipped); everything
//! else propagates to the caller with its cause attached.

use std::path::PathBuf;
use thiserror::Error;

pub use crate::metadata::validate::ValidationError;
pub use crate::onchain::ChainSubmitError;
pub use crate::publish::PublishError;

/// Missing or malformed configuration, files or variables. Fatal, no retry.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Missing {what}: {path}")]
    MissingFile { what: &'static str, path: PathBuf },

    #[error("Missing {0} in environment.")]
    MissingVariable(String),

    #[error("Unsupported home chain `{chain}`. Supported chains: {supported}.")]
    UnsupportedChain { chain: String, supported: String },

    #[error("Workspace is not initialized: {0}. Run 'mtd init' first.")]
    NotInitialized(PathBuf),

    #[error("Workspace {0} is in use by another run")]
    WorkspaceBusy(PathBuf),

    #[error("Service record could not be located after provisioning")]
    ServiceNotFound,

    #[error("{0}")]
    ServiceRecord(String),

    #[error("Invalid value for `{key}`: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("External platform command failed: {0}")]
    Platform(String),

    #[error("Failed to load configuration: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigurationError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigurationError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        ConfigurationError::Json {
            path: path.into(),
            source,
        }
    }
}

/// Password unavailable or unusable. Fatal, user-actionable.
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Password could not be set for Operate.")]
    PasswordUnavailable,

    #[error("Password prompt failed: {0}")]
    Prompt(#[source] std::io::Error),

    #[error("Failed to decrypt key store entry {path}: {reason}")]
    Decrypt { path: PathBuf, reason: String },

    #[error("Private key file is empty: {0}")]
    EmptyPrivateKey(PathBuf),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),
}

/// Any failure of a setup run, tagged with its class.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Chain submit error: {0}")]
    ChainSubmit(#[from] ChainSubmitError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),
}

pub type Result<T> = std::result::Result<T, SetupError>;
