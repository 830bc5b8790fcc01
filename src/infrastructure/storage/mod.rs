use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

pub mod local;
pub mod s3;

/// Content address of a sealed blob: lowercase hex SHA-256 of its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobId(String);

impl BlobId {
    pub fn for_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-character fan-out prefix used by the on-disk layout.
    pub fn shard(&self) -> &str {
        &self.0[..2]
    }
}

impl FromStr for BlobId {
    type Err = BlobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            return Err(BlobError::InvalidId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for BlobId {
    type Error = BlobError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BlobId> for String {
    fn from(id: BlobId) -> Self {
        id.0
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata of a sealed blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Blob {
    pub blob_id: BlobId,
    pub size: u64,
    pub content_hash: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(BlobId),

    #[error("invalid blob id: {0}")]
    InvalidId(String),

    #[error("blob storage unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for BlobError {
    fn from(e: std::io::Error) -> Self {
        BlobError::Unavailable(e.to_string())
    }
}

/// Durable, content-addressed byte storage.
///
/// A blob becomes visible to `get`/`exists` only once it is fully written and
/// sealed. Identical bytes always map to the same `BlobId`.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, data: Bytes) -> Result<Blob, BlobError>;

    async fn get(&self, id: &BlobId) -> Result<Bytes, BlobError>;

    async fn exists(&self, id: &BlobId) -> Result<bool, BlobError>;

    async fn stat(&self, id: &BlobId) -> Result<Blob, BlobError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_id_is_sha256_hex() {
        let id = BlobId::for_bytes(b"abc");
        assert_eq!(
            id.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(id.shard(), "ba");
    }

    #[test]
    fn blob_id_rejects_paths_and_uppercase() {
        assert!("../etc/passwd".parse::<BlobId>().is_err());
        assert!("BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD"
            .parse::<BlobId>()
            .is_err());
        assert!("ba7816bf".parse::<BlobId>().is_err());
    }

    #[test]
    fn blob_id_serde_validates() {
        let id = BlobId::for_bytes(b"hello");
        let json = serde_json::to_string(&id).unwrap();
        let back: BlobId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<BlobId>("\"nope\"").is_err());
    }
}
