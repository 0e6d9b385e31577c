use crate::{validate_key, BlobError, ObjectMetadata, ObjectStore, Result, StoredObject};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Local filesystem object store with a SQLite metadata index.
#[derive(Clone, Debug)]
pub struct BlobStore {
    root: PathBuf,
    public_base_url: String,
    meta_conn: Arc<Mutex<Connection>>,
}

impl BlobStore {
    /// Open (or create) a store rooted at `root`. Metadata lives in
    /// `root/meta.sqlite`; public URLs are `{public_base_url}/{key}`.
    pub async fn new(
        root: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
    ) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("objects")).await?;

        let conn = Connection::open(root.join("meta.sqlite"))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value JSON NOT NULL
            )",
            [],
        )?;

        let public_base_url = public_base_url.into().trim_end_matches('/').to_string();
        info!("[Blob] Object store at {:?} serving {}", root, public_base_url);

        Ok(Self {
            root,
            public_base_url,
            meta_conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn get_meta(&self, key: &str) -> Result<Option<ObjectMetadata>> {
        let conn = self.meta_conn.lock().await;
        let value: Option<String> = conn
            .query_row("SELECT value FROM meta WHERE key = ?", params![key], |row| {
                row.get(0)
            })
            .optional()?;

        match value {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.root.join("objects").join(key)
    }
}

#[async_trait]
impl ObjectStore for BlobStore {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<StoredObject> {
        validate_key(key)?;

        let content_hash = format!("{:x}", Sha256::digest(&data));
        let meta = ObjectMetadata {
            key: key.to_string(),
            content_type: content_type.to_string(),
            size: data.len() as u64,
            content_hash,
            created_at: Utc::now(),
        };

        atomic_write(&self.file_path(key), &data, &self.root.join("tmp")).await?;

        {
            let conn = self.meta_conn.lock().await;
            conn.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
                params![key, serde_json::to_string(&meta)?],
            )?;
        }

        debug!("[Blob] Stored {} ({} bytes)", key, meta.size);

        Ok(StoredObject {
            key: key.to_string(),
            url: self.public_url(key),
            size: meta.size,
            content_type: meta.content_type,
        })
    }

    async fn get(&self, key: &str) -> Result<Option<(Bytes, ObjectMetadata)>> {
        validate_key(key)?;

        let Some(meta) = self.get_meta(key).await? else {
            return Ok(None);
        };

        let path = self.file_path(key);
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }

        let data = fs::read(&path).await?;
        let actual = format!("{:x}", Sha256::digest(&data));
        if actual != meta.content_hash {
            return Err(BlobError::ChecksumMismatch {
                key: key.to_string(),
                expected: meta.content_hash,
                actual,
            });
        }

        Ok(Some((Bytes::from(data), meta)))
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }
}

/// Write through a temp file in `temp_folder`, then rename into place.
pub async fn atomic_write(dest: &Path, data: &[u8], temp_folder: &Path) -> Result<()> {
    fs::create_dir_all(temp_folder).await?;

    let temp_path = temp_folder.join(format!("tmp_{}", uuid::Uuid::new_v4()));
    fs::write(&temp_path, data).await?;

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }

    fs::rename(&temp_path, dest).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open(dir: &TempDir) -> BlobStore {
        BlobStore::new(dir.path(), "http://localhost:3001/files/")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn put_then_get_returns_same_bytes() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let stored = store
            .put("cover-1.png", Bytes::from_static(b"\x89PNG fake"), "image/png")
            .await
            .unwrap();
        assert_eq!(stored.url, "http://localhost:3001/files/cover-1.png");
        assert_eq!(stored.size, 9);

        let (data, meta) = store.get("cover-1.png").await.unwrap().unwrap();
        assert_eq!(&data[..], b"\x89PNG fake");
        assert_eq!(meta.content_type, "image/png");
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        assert!(store.get("nothing.pdf").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupted_file_fails_checksum() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        store
            .put("book-1.pdf", Bytes::from_static(b"%PDF-1.7"), "application/pdf")
            .await
            .unwrap();

        std::fs::write(dir.path().join("objects").join("book-1.pdf"), "tampered").unwrap();

        let err = store.get("book-1.pdf").await.unwrap_err();
        assert!(err.to_string().contains("Checksum mismatch"));
    }

    #[tokio::test]
    async fn put_overwrites_existing_key() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        store
            .put("audio-1.mp3", Bytes::from_static(b"ID3 v1"), "audio/mpeg")
            .await
            .unwrap();
        store
            .put("audio-1.mp3", Bytes::from_static(b"ID3 v2!"), "audio/mpeg")
            .await
            .unwrap();

        let (data, meta) = store.get("audio-1.mp3").await.unwrap().unwrap();
        assert_eq!(&data[..], b"ID3 v2!");
        assert_eq!(meta.size, 7);
    }

    #[tokio::test]
    async fn put_rejects_path_like_keys() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let err = store
            .put("../escape.pdf", Bytes::from_static(b"x"), "application/pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::InvalidKey(_)));
    }
}
