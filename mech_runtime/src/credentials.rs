//! Operate password resolution
//!
//! The password is reused from the environment snapshot when present,
//! otherwise prompted for once and persisted. It is then passed explicitly
//! to every step that needs it.

use crate::env::EnvSnapshot;
use crate::error::{CredentialError, SetupError};
use log::info;
use std::fmt;
use std::path::Path;
use zeroize::Zeroizing;

pub const PASSWORD_KEY: &str = "OPERATE_PASSWORD";

/// Decrypted platform password, wiped on drop
#[derive(Clone)]
pub struct Password(Zeroizing<String>);

impl Password {
    /// `None` for a blank password
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = Zeroizing::new(value.into());
        if value.trim().is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn expose(&self) -> &str {
        self.0.trim()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Interactive source of a new password
pub trait PasswordPrompt: Send + Sync {
    fn prompt(&self, message: &str) -> Result<Zeroizing<String>, CredentialError>;
}

/// Reads the password from the controlling terminal without echo.
pub struct TerminalPrompt;

impl PasswordPrompt for TerminalPrompt {
    fn prompt(&self, message: &str) -> Result<Zeroizing<String>, CredentialError> {
        rpassword::prompt_password(message)
            .map(Zeroizing::new)
            .map_err(CredentialError::Prompt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordSource {
    /// Reused from the environment snapshot
    Persisted,
    /// Prompted for and written to the snapshot
    Prompted,
}

/// Reuse the persisted password or prompt for one and persist it.
pub fn resolve_password(
    env_path: &Path,
    prompt: &dyn PasswordPrompt,
) -> Result<(Password, PasswordSource), SetupError> {
    let mut snapshot = EnvSnapshot::load(env_path)?;
    if let Some(password) = snapshot.get(PASSWORD_KEY).and_then(Password::new) {
        info!("Using the Operate password stored in {}", env_path.display());
        return Ok((password, PasswordSource::Persisted));
    }

    let entered = prompt.prompt("Enter the password for your Operate account: ")?;
    let password = Password::new(entered.as_str()).ok_or(CredentialError::PasswordUnavailable)?;

    snapshot.set(PASSWORD_KEY, password.expose());
    snapshot.save(env_path)?;
    info!("Operate password stored in {}", env_path.display());
    Ok((password, PasswordSource::Prompted))
}
