//! IPFS HTTP API store

use super::{ContentStore, PublishError};
use async_trait::async_trait;
use log::debug;
use reqwest::multipart::{Form, Part};
use serde_json::Value;

/// Talks to `<node>/api/v0/add`.
pub struct IpfsHttpStore {
    client: reqwest::Client,
    api_url: String,
}

impl IpfsHttpStore {
    /// `node` is either an HTTP(S) URL or a multiaddr such as
    /// `/dns/registry.autonolas.tech/tcp/443/https`.
    pub fn new(node: &str) -> Result<Self, PublishError> {
        Ok(Self {
            client: reqwest::Client::new(),
            api_url: node_url(node)?,
        })
    }
}

#[async_trait]
impl ContentStore for IpfsHttpStore {
    async fn add(&self, file_name: &str, bytes: Vec<u8>) -> Result<Value, PublishError> {
        let url = format!("{}/api/v0/add", self.api_url);
        debug!("Uploading {} ({} bytes) to {}", file_name, bytes.len(), url);

        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name.to_string()));
        let response = self
            .client
            .post(&url)
            .query(&[("pin", "true"), ("wrap-with-directory", "false"), ("cid-version", "0")])
            .multipart(form)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PublishError::Store(e.to_string()))?;

        response
            .json::<Value>()
            .await
            .map_err(|e| PublishError::Store(format!("invalid response: {}", e)))
    }
}

/// Base URL of an IPFS node given as URL or multiaddr.
pub fn node_url(node: &str) -> Result<String, PublishError> {
    let node = node.trim();
    if node.starts_with("http://") || node.starts_with("https://") {
        return Ok(node.trim_end_matches('/').to_string());
    }

    let invalid = || PublishError::InvalidEndpoint(node.to_string());
    let parts: Vec<&str> = node.trim_start_matches('/').split('/').collect();
    match parts.as_slice() {
        [proto, host, "tcp", port, rest @ ..] => {
            let host = match *proto {
                "dns" | "dns4" | "dns6" | "ip4" => host.to_string(),
                "ip6" => format!("[{}]", host),
                _ => return Err(invalid()),
            };
            port.parse::<u16>().map_err(|_| invalid())?;
            let scheme = match rest {
                [] | ["http"] => "http",
                ["https"] | ["tls", "http"] => "https",
                _ => return Err(invalid()),
            };
            Ok(format!("{}://{}:{}", scheme, host, port))
        }
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiaddr_to_url() {
        assert_eq!(
            node_url("/dns/registry.autonolas.tech/tcp/443/https").unwrap(),
            "https://registry.autonolas.tech:443"
        );
        assert_eq!(node_url("/ip4/127.0.0.1/tcp/5001").unwrap(), "http://127.0.0.1:5001");
        assert_eq!(node_url("/ip6/::1/tcp/5001/http").unwrap(), "http://[::1]:5001");
    }

    #[test]
    fn test_url_passes_through() {
        assert_eq!(node_url("http://localhost:5001/").unwrap(), "http://localhost:5001");
    }

    #[test]
    fn test_invalid_addresses() {
        assert!(node_url("/dns/host/udp/53").is_err());
        assert!(node_url("/dns/host/tcp/notaport/https").is_err());
        assert!(node_url("ftp://host").is_err());
    }
}
