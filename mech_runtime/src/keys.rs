//! Key material
//!
//! Decrypts the agent key from the platform key store and writes the two key
//! files the runtime expects. Each file is created at most once.

use crate::credentials::Password;
use crate::error::{ConfigurationError, CredentialError, SetupError};
use crate::workspace::{ensure_once, read_to_string, EnsureOutcome, WorkspaceContext};
use ethers::signers::{LocalWallet, Signer};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use zeroize::{Zeroize, Zeroizing};

pub const AGENT_KEY_FILE: &str = "ethereum_private_key.txt";
pub const SERVICE_KEY_FILE: &str = "keys.json";

/// Decrypted key-store entry
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyMaterial {
    pub ledger: Value,
    pub address: String,
    pub private_key: String,
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("ledger", &self.ledger)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Key-store decryption collaborator
pub trait KeyDecryptor: Send + Sync {
    fn decrypt(&self, key_file: &Path, password: &Password) -> Result<KeyMaterial, CredentialError>;
}

/// Decrypts platform key files whose `private_key` holds a V3 keystore.
pub struct KeystoreDecryptor;

impl KeyDecryptor for KeystoreDecryptor {
    fn decrypt(&self, key_file: &Path, password: &Password) -> Result<KeyMaterial, CredentialError> {
        let fail = |reason: String| CredentialError::Decrypt {
            path: key_file.to_path_buf(),
            reason,
        };

        let text = fs::read_to_string(key_file).map_err(|e| fail(e.to_string()))?;
        let stored: KeyMaterial = serde_json::from_str(&text).map_err(|e| fail(e.to_string()))?;

        // Unencrypted entries carry the hex key directly
        if stored.private_key.trim_start().starts_with("0x") {
            return Ok(stored);
        }

        let mut keystore = tempfile::NamedTempFile::new().map_err(|e| fail(e.to_string()))?;
        keystore
            .write_all(stored.private_key.as_bytes())
            .map_err(|e| fail(e.to_string()))?;

        let wallet = LocalWallet::decrypt_keystore(keystore.path(), password.expose())
            .map_err(|e| fail(e.to_string()))?;
        let mut secret = wallet.signer().to_bytes();
        let private_key = format!("0x{}", hex::encode(secret.as_slice()));
        secret.as_mut_slice().zeroize();

        Ok(KeyMaterial {
            ledger: stored.ledger.clone(),
            address: format!("{:?}", wallet.address()),
            private_key,
        })
    }
}

/// What key materialization did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMaterialization {
    /// The platform has no key store yet
    NoKeyStore,
    Materialized {
        source: PathBuf,
        agent_key: EnsureOutcome,
        service_key: EnsureOutcome,
    },
}

/// First key-store entry, in name order
fn first_key_file(key_store: &Path) -> Result<Option<PathBuf>, ConfigurationError> {
    if !key_store.is_dir() {
        return Ok(None);
    }
    let entries = fs::read_dir(key_store).map_err(|e| ConfigurationError::io(key_store, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| ConfigurationError::io(key_store, e))?.path();
        let backup = path.extension().map(|ext| ext == "bak").unwrap_or(false);
        if path.is_file() && !backup {
            files.push(path);
        }
    }
    files.sort();
    Ok(files.into_iter().next())
}

/// Write `keys/ethereum_private_key.txt` and `keys/keys.json` when missing.
///
/// Decryption only happens when at least one file has to be created.
pub fn materialize_keys(
    ctx: &WorkspaceContext,
    decryptor: &dyn KeyDecryptor,
    password: &Password,
) -> Result<KeyMaterialization, SetupError> {
    let key_store = ctx.operate_dir().join("keys");
    let Some(source) = first_key_file(&key_store)? else {
        warn!("No key store entry found under {}", key_store.display());
        return Ok(KeyMaterialization::NoKeyStore);
    };
    info!("Key file found at: {}", source.display());

    let agent_path = ctx.keys_dir().join(AGENT_KEY_FILE);
    let service_path = ctx.keys_dir().join(SERVICE_KEY_FILE);

    let material = if agent_path.exists() && service_path.exists() {
        None
    } else {
        Some(decryptor.decrypt(&source, password)?)
    };

    let agent_key = ensure_once(&agent_path, || -> Result<Vec<u8>, SetupError> {
        Ok(material.as_ref().map(|m| m.private_key.as_bytes().to_vec()).unwrap_or_default())
    })?;
    report("Agent", &agent_path, agent_key);

    let service_key = ensure_once(&service_path, || -> Result<Vec<u8>, SetupError> {
        let entries: Vec<&KeyMaterial> = material.iter().collect();
        serde_json::to_vec_pretty(&entries).map_err(|e| ConfigurationError::json(&service_path, e).into())
    })?;
    report("Service", &service_path, service_key);

    Ok(KeyMaterialization::Materialized {
        source,
        agent_key,
        service_key,
    })
}

fn report(label: &str, path: &Path, outcome: EnsureOutcome) {
    match outcome {
        EnsureOutcome::Created => info!("{} key written to: {}", label, path.display()),
        EnsureOutcome::AlreadyPresent => info!("{} key found at: {}. Skipping creation", label, path.display()),
    }
}

/// Signing key read from the agent key file
pub struct SignerKey(Zeroizing<String>);

impl SignerKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(Zeroizing::new(key.into()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn wallet(&self) -> Result<LocalWallet, CredentialError> {
        self.0
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| CredentialError::InvalidPrivateKey(e.to_string()))
    }
}

/// Load the agent key; an empty file is a credential error.
pub fn load_signer_key(path: &Path) -> Result<SignerKey, SetupError> {
    if !path.exists() {
        return Err(ConfigurationError::MissingFile {
            what: "agent key file",
            path: path.to_path_buf(),
        }
        .into());
    }
    let key = Zeroizing::new(read_to_string(path)?.trim().to_string());
    if key.is_empty() {
        return Err(CredentialError::EmptyPrivateKey(path.to_path_buf()).into());
    }
    Ok(SignerKey(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    struct StubDecryptor {
        calls: AtomicUsize,
    }

    impl KeyDecryptor for StubDecryptor {
        fn decrypt(&self, _key_file: &Path, _password: &Password) -> Result<KeyMaterial, CredentialError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(KeyMaterial {
                ledger: Value::String("ethereum".to_string()),
                address: "0x2c7536E3605D9C16a7a3D7b1898e529396a65c23".to_string(),
                private_key: KEY.to_string(),
            })
        }
    }

    fn workspace_with_key_store() -> (tempfile::TempDir, WorkspaceContext) {
        let dir = tempfile::tempdir().unwrap();
        let ctx = WorkspaceContext::new(dir.path());
        let store = ctx.operate_dir().join("keys");
        fs::create_dir_all(&store).unwrap();
        fs::write(store.join("0xB.bak"), "{}").unwrap();
        fs::write(store.join("0xA"), "{}").unwrap();
        (dir, ctx)
    }

    #[test]
    fn test_keys_are_materialized_once() {
        let (_dir, ctx) = workspace_with_key_store();
        let decryptor = StubDecryptor { calls: AtomicUsize::new(0) };
        let password = Password::new("secret").unwrap();

        let first = materialize_keys(&ctx, &decryptor, &password).unwrap();
        match first {
            KeyMaterialization::Materialized { source, agent_key, service_key } => {
                assert!(source.ends_with("0xA"));
                assert!(agent_key.created());
                assert!(service_key.created());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(fs::read_to_string(ctx.keys_dir().join(AGENT_KEY_FILE)).unwrap(), KEY);
        let service: Vec<Value> =
            serde_json::from_str(&fs::read_to_string(ctx.keys_dir().join(SERVICE_KEY_FILE)).unwrap()).unwrap();
        assert_eq!(service[0]["private_key"], KEY);

        let second = materialize_keys(&ctx, &decryptor, &password).unwrap();
        assert!(matches!(
            second,
            KeyMaterialization::Materialized {
                agent_key: EnsureOutcome::AlreadyPresent,
                service_key: EnsureOutcome::AlreadyPresent,
                ..
            }
        ));
        assert_eq!(decryptor.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_key_store_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = WorkspaceContext::new(dir.path());
        let decryptor = StubDecryptor { calls: AtomicUsize::new(0) };
        let outcome = materialize_keys(&ctx, &decryptor, &Password::new("x").unwrap()).unwrap();
        assert_eq!(outcome, KeyMaterialization::NoKeyStore);
    }

    #[test]
    fn test_plain_key_entry_is_returned_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0xA");
        fs::write(
            &path,
            format!(r#"{{"ledger": "ethereum", "address": "0xA", "private_key": "{}"}}"#, KEY),
        )
        .unwrap();
        let material = KeystoreDecryptor.decrypt(&path, &Password::new("x").unwrap()).unwrap();
        assert_eq!(material.private_key, KEY);
    }

    #[test]
    fn test_empty_agent_key_is_a_credential_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(AGENT_KEY_FILE);
        fs::write(&path, "\n").unwrap();
        let err = load_signer_key(&path).err().unwrap();
        assert!(matches!(err, SetupError::Credential(CredentialError::EmptyPrivateKey(_))));
    }

    #[test]
    fn test_signer_key_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(AGENT_KEY_FILE);
        fs::write(&path, format!("{}\n", KEY)).unwrap();
        let wallet = load_signer_key(&path).unwrap().wallet().unwrap();
        assert_eq!(
            format!("{:?}", wallet.address()),
            "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23"
        );
    }
}
