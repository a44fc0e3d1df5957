//! Content publisher
//!
//! Pushes a validated manifest to the content-addressed store and converts
//! the returned identifier into the on-chain hash encoding.

pub mod cid;
pub mod ipfs;

use crate::metadata::ValidatedManifest;
use async_trait::async_trait;
use log::info;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

pub use cid::PublishedHash;
pub use ipfs::{node_url, IpfsHttpStore};

/// Key of the identifier in the store's response
pub const RESPONSE_KEY: &str = "Hash";

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Error pushing metadata to ipfs: {0}")]
    Store(String),

    #[error("Key '{0}' not found in ipfs response")]
    MissingKey(&'static str),

    #[error("Unsupported content identifier {cid}: {reason}")]
    UnsupportedCid { cid: String, reason: String },

    #[error("Invalid metadata hash `{0}`: expected f01701220 followed by 64 hex characters")]
    InvalidEncodedHash(String),

    #[error("Invalid IPFS node address: {0}")]
    InvalidEndpoint(String),
}

/// Content-addressed store collaborator
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store `bytes` pinned as a single object and return the raw response.
    async fn add(&self, file_name: &str, bytes: Vec<u8>) -> Result<Value, PublishError>;
}

pub struct ContentPublisher {
    store: Arc<dyn ContentStore>,
}

impl ContentPublisher {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    pub async fn publish(&self, manifest: &ValidatedManifest) -> Result<PublishedHash, PublishError> {
        let response = self
            .store
            .add(crate::workspace::METADATA_FILE, manifest.bytes().to_vec())
            .await?;

        let identifier = response
            .get(RESPONSE_KEY)
            .and_then(Value::as_str)
            .ok_or(PublishError::MissingKey(RESPONSE_KEY))?;

        let hash = PublishedHash::from_cid(identifier)?;
        info!(
            "Metadata with {} tool(s) published as {} ({})",
            manifest.tool_count(),
            identifier,
            hash
        );
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{validate_bytes, Manifest};
    use serde_json::json;
    use std::sync::Mutex;

    struct StubStore {
        response: Value,
        received: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl ContentStore for StubStore {
        async fn add(&self, _file_name: &str, bytes: Vec<u8>) -> Result<Value, PublishError> {
            if let Ok(mut received) = self.received.lock() {
                received.push(bytes);
            }
            Ok(self.response.clone())
        }
    }

    fn manifest() -> ValidatedManifest {
        validate_bytes(Manifest::default().to_json_bytes().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_publish_encodes_identifier() {
        let store = Arc::new(StubStore {
            response: json!({"Name": "metadata.json", "Hash": "QmaozNR7DZHQK1ZcU9p7QdrshMvXqWK6gpu5rmrkPdT3L4", "Size": "11"}),
            received: Mutex::new(Vec::new()),
        });
        let publisher = ContentPublisher::new(store.clone());
        let manifest = manifest();

        let hash = publisher.publish(&manifest).await.unwrap();
        assert_eq!(
            hash.as_str(),
            "f01701220b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(store.received.lock().unwrap()[0], manifest.bytes());
    }

    #[tokio::test]
    async fn test_missing_hash_key_is_a_publish_error() {
        let store = Arc::new(StubStore {
            response: json!({"Name": "metadata.json"}),
            received: Mutex::new(Vec::new()),
        });
        let err = ContentPublisher::new(store).publish(&manifest()).await.unwrap_err();
        assert_eq!(err.to_string(), "Key 'Hash' not found in ipfs response");
    }
}
