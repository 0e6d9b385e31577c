//! Object storage for uploaded library media.
//!
//! The server only talks to the [`ObjectStore`] trait. [`BlobStore`] is the
//! local backend: files on disk plus a SQLite metadata index.

mod store;

pub use store::{atomic_write, BlobStore};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata error: {0}")]
    Metadata(String),
    #[error("invalid object key: {0:?}")]
    InvalidKey(String),
    #[error("Checksum mismatch for object {key}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        key: String,
        expected: String,
        actual: String,
    },
}

impl From<rusqlite::Error> for BlobError {
    fn from(err: rusqlite::Error) -> Self {
        BlobError::Metadata(err.to_string())
    }
}

impl From<serde_json::Error> for BlobError {
    fn from(err: serde_json::Error) -> Self {
        BlobError::Metadata(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BlobError>;

/// Metadata recorded for every stored object.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    pub key: String,
    pub content_type: String,
    pub size: u64,
    /// SHA-256 of the object content, hex encoded.
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Result of a successful `put`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    pub key: String,
    pub url: String,
    pub size: u64,
    pub content_type: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` under `key` and return where the public can fetch it.
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<StoredObject>;

    async fn get(&self, key: &str) -> Result<Option<(Bytes, ObjectMetadata)>>;

    fn public_url(&self, key: &str) -> String;
}

/// Keys are flat names: `[A-Za-z0-9._-]`, non-empty, no leading dot.
pub fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key.len() <= 200
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if valid {
        Ok(())
    } else {
        Err(BlobError::InvalidKey(key.to_string()))
    }
}
