//! On-chain hash encoding
//!
//! The metadata contract stores the raw sha2-256 digest of the manifest. Its
//! string form is the base16 multibase of a dag-pb CIDv1:
//! `f` + `01` (v1) + `70` (dag-pb) + `12` (sha2-256) + `20` (32 bytes) + digest.

use super::PublishError;
use multibase::Base;
use std::fmt;

/// Fixed prefix of every encoded hash
pub const PREFIX: &str = "f01701220";
pub const ENCODED_LEN: usize = PREFIX.len() + 64;

const CID_V1: u64 = 0x01;
const DAG_PB: u64 = 0x70;
const SHA2_256: u64 = 0x12;
const DIGEST_LEN: usize = 32;

/// Content hash in the contract's encoding
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PublishedHash(String);

impl PublishedHash {
    pub fn from_digest(digest: [u8; 32]) -> Self {
        Self(multibase::encode(Base::Base16Lower, cid_v1_bytes(&digest)))
    }

    /// Convert a store identifier (CIDv0 or CIDv1 in any multibase).
    pub fn from_cid(cid: &str) -> Result<Self, PublishError> {
        Ok(Self::from_digest(parse_cid(cid)?))
    }

    /// Parse an already encoded hash, e.g. from the environment snapshot.
    pub fn parse(encoded: &str) -> Result<Self, PublishError> {
        let encoded = encoded.trim();
        if !encoded.starts_with(PREFIX) || encoded.len() != ENCODED_LEN {
            return Err(PublishError::InvalidEncodedHash(encoded.to_string()));
        }
        let digest = parse_cid(encoded).map_err(|_| PublishError::InvalidEncodedHash(encoded.to_string()))?;
        Ok(Self::from_digest(digest))
    }

    /// Raw 32 bytes passed to the contract
    pub fn digest(&self) -> [u8; 32] {
        let mut digest = [0u8; 32];
        // Constructors guarantee PREFIX followed by 64 lowercase hex digits
        if let Ok(bytes) = hex::decode(&self.0[PREFIX.len()..]) {
            digest.copy_from_slice(&bytes);
        }
        digest
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// CIDv0 form (`Qm...`) of the same content
    pub fn cid_v0(&self) -> String {
        let mut multihash = vec![SHA2_256 as u8, DIGEST_LEN as u8];
        multihash.extend_from_slice(&self.digest());
        bs58::encode(multihash).into_string()
    }

    /// CIDv1 base32 form (`bafy...`) of the same content
    pub fn cid_v1(&self) -> String {
        multibase::encode(Base::Base32Lower, cid_v1_bytes(&self.digest()))
    }
}

impl fmt::Display for PublishedHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn cid_v1_bytes(digest: &[u8; 32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(4 + DIGEST_LEN);
    bytes.extend_from_slice(&[CID_V1 as u8, DAG_PB as u8, SHA2_256 as u8, DIGEST_LEN as u8]);
    bytes.extend_from_slice(digest);
    bytes
}

fn unsupported(cid: &str, reason: impl Into<String>) -> PublishError {
    PublishError::UnsupportedCid {
        cid: cid.to_string(),
        reason: reason.into(),
    }
}

/// sha2-256 digest addressed by `cid`
fn parse_cid(cid: &str) -> Result<[u8; 32], PublishError> {
    let cid = cid.trim();

    // CIDv0 is a bare base58btc multihash, implicitly dag-pb
    if cid.len() == 46 && cid.starts_with("Qm") {
        let multihash = bs58::decode(cid)
            .into_vec()
            .map_err(|e| unsupported(cid, format!("invalid base58: {}", e)))?;
        return parse_multihash(cid, &multihash);
    }

    let (_, bytes) = multibase::decode(cid).map_err(|e| unsupported(cid, format!("invalid multibase: {}", e)))?;
    let (version, rest) =
        unsigned_varint::decode::u64(&bytes).map_err(|e| unsupported(cid, format!("invalid version: {}", e)))?;
    if version != CID_V1 {
        return Err(unsupported(cid, format!("unsupported CID version {}", version)));
    }
    let (codec, rest) =
        unsigned_varint::decode::u64(rest).map_err(|e| unsupported(cid, format!("invalid codec: {}", e)))?;
    if codec != DAG_PB {
        return Err(unsupported(cid, format!("codec 0x{:x} is not dag-pb", codec)));
    }
    parse_multihash(cid, rest)
}

fn parse_multihash(cid: &str, multihash: &[u8]) -> Result<[u8; 32], PublishError> {
    let (code, rest) =
        unsigned_varint::decode::u64(multihash).map_err(|e| unsupported(cid, format!("invalid multihash: {}", e)))?;
    if code != SHA2_256 {
        return Err(unsupported(cid, format!("hash function 0x{:x} is not sha2-256", code)));
    }
    let (len, digest) =
        unsigned_varint::decode::u64(rest).map_err(|e| unsupported(cid, format!("invalid digest length: {}", e)))?;
    if len as usize != DIGEST_LEN || digest.len() != DIGEST_LEN {
        return Err(unsupported(cid, format!("digest is {} bytes, expected 32", digest.len())));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(digest);
    Ok(out)
}
