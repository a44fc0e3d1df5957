//! Workspace state
//!
//! Owns the on-disk layout of a mech workspace. Path accessors are pure
//! functions of the root; the only I/O here is existence checks and
//! idempotent directory creation.

pub mod bootstrap;
pub mod lock;

use crate::error::ConfigurationError;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

pub use bootstrap::initialize_workspace;
pub use lock::WorkspaceLock;

/// Marker written once bootstrap completed
pub const INITIALIZED_MARKER: &str = ".mech_initialized";
pub const ENV_FILE: &str = ".env";
pub const ENV_TEMPLATE_FILE: &str = ".example.env";
pub const METADATA_FILE: &str = "metadata.json";

/// Resolved paths of one workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceContext {
    root: PathBuf,
}

impl WorkspaceContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Environment snapshot consumed by the runtime
    pub fn env_path(&self) -> PathBuf {
        self.root.join(ENV_FILE)
    }

    pub fn env_template_path(&self) -> PathBuf {
        self.root.join(ENV_TEMPLATE_FILE)
    }

    /// Per-chain service templates
    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    pub fn chain_template_path(&self, chain: crate::chains::SupportedChain) -> PathBuf {
        self.config_dir().join(chain.template_name())
    }

    /// Home of the agent orchestration platform (services and key store)
    pub fn operate_dir(&self) -> PathBuf {
        self.root.join(".operate")
    }

    /// Materialized key files
    pub fn keys_dir(&self) -> PathBuf {
        self.root.join("keys")
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(METADATA_FILE)
    }

    /// Handler package registry
    pub fn packages_dir(&self) -> PathBuf {
        self.root.join("packages")
    }

    pub fn config_file_path(&self) -> PathBuf {
        self.root.join(crate::config::CONFIG_FILE_NAME)
    }

    pub fn initialized_marker_path(&self) -> PathBuf {
        self.root.join(INITIALIZED_MARKER)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(".mech.lock")
    }

    /// initialized ⇔ marker ∧ config dir ∧ env snapshot
    pub fn is_initialized(&self) -> bool {
        self.initialized_marker_path().exists() && self.config_dir().is_dir() && self.env_path().exists()
    }

    pub fn ensure_root_exists(&self) -> Result<(), ConfigurationError> {
        ensure_dir(&self.root)
    }

    /// Fail with `NotInitialized` unless bootstrap has completed.
    pub fn require_initialized(&self) -> Result<(), ConfigurationError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(ConfigurationError::NotInitialized(self.root.clone()))
        }
    }
}

pub(crate) fn ensure_dir(path: &Path) -> Result<(), ConfigurationError> {
    fs::create_dir_all(path).map_err(|e| ConfigurationError::io(path, e))
}

/// Result of [`ensure_once`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    AlreadyPresent,
}

impl EnsureOutcome {
    pub fn created(&self) -> bool {
        matches!(self, EnsureOutcome::Created)
    }
}

/// Create `path` with the bytes returned by `producer`, unless it already exists.
///
/// The producer only runs when the file is absent. Parent directories are
/// created as needed.
pub fn ensure_once<F, E>(path: &Path, producer: F) -> Result<EnsureOutcome, E>
where
    F: FnOnce() -> Result<Vec<u8>, E>,
    E: From<ConfigurationError>,
{
    if path.exists() {
        debug!("{} already present, skipping creation", path.display());
        return Ok(EnsureOutcome::AlreadyPresent);
    }
    let contents = producer()?;
    write_file(path, &contents)?;
    Ok(EnsureOutcome::Created)
}

/// Write `contents` to `path`, creating parent directories.
pub(crate) fn write_file(path: &Path, contents: &[u8]) -> Result<(), ConfigurationError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    fs::write(path, contents).map_err(|e| ConfigurationError::io(path, e))
}

pub(crate) fn read_to_string(path: &Path) -> Result<String, ConfigurationError> {
    fs::read_to_string(path).map_err(|e| ConfigurationError::io(path, e))
}
