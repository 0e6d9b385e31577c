//! Upload Service
//!
//! Checks an uploaded file against its declared kind (MIME allow-list and
//! size ceiling), then hands the bytes to the configured [`ObjectStore`].

pub mod handlers;

use crate::error::{Error, Result};
use bytes::Bytes;
use library_blob::{BlobError, ObjectMetadata, ObjectStore};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const MIB: u64 = 1024 * 1024;

const BOOK_TYPES: &[&str] = &[
    "application/pdf",
    "application/x-pdf",
    "application/acrobat",
    "applications/vnd.pdf",
    "text/pdf",
    "text/x-pdf",
];

const COVER_TYPES: &[&str] = &["image/jpeg", "image/jpg", "image/png", "image/webp", "image/gif"];

const AUDIO_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/mp3",
    "audio/wav",
    "audio/x-wav",
    "audio/wave",
    "audio/ogg",
    "audio/mp4",
    "audio/x-m4a",
    "audio/aac",
    "audio/webm",
    "audio/flac",
];

const GENERIC_BINARY: &str = "application/octet-stream";

/// Declared purpose of an upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadKind {
    Book,
    Cover,
    Audio,
}

impl UploadKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UploadKind::Book => "book",
            UploadKind::Cover => "cover",
            UploadKind::Audio => "audio",
        }
    }

    pub fn accepted_types(self) -> &'static [&'static str] {
        match self {
            UploadKind::Book => BOOK_TYPES,
            UploadKind::Cover => COVER_TYPES,
            UploadKind::Audio => AUDIO_TYPES,
        }
    }

    pub fn max_megabytes(self) -> u64 {
        match self {
            UploadKind::Book => 50,
            UploadKind::Cover => 20,
            UploadKind::Audio => 30,
        }
    }

    pub fn max_bytes(self) -> u64 {
        self.max_megabytes() * MIB
    }
}

impl fmt::Display for UploadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "book" => Ok(UploadKind::Book),
            "cover" => Ok(UploadKind::Cover),
            "audio" => Ok(UploadKind::Audio),
            other => Err(Error::Validation(format!(
                "invalid type: {other:?}; expected book, cover or audio"
            ))),
        }
    }
}

/// What a successful upload reports back.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOutcome {
    pub url: String,
    pub filename: String,
    pub size: u64,
    pub content_type: String,
}

/// Lowercased MIME type without parameters (`"Image/PNG; q=1"` becomes `"image/png"`).
pub fn normalize_mime(raw: Option<&str>) -> String {
    raw.and_then(|m| m.split(';').next())
        .map(|m| m.trim().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Accept or reject a file for `kind`. Returns the content type it will be stored with.
pub fn validate_upload(
    kind: UploadKind,
    filename: &str,
    content_type: Option<&str>,
    size: u64,
) -> Result<String> {
    let mime = normalize_mime(content_type);

    let stored_type = if kind.accepted_types().contains(&mime.as_str()) {
        mime
    } else if kind == UploadKind::Book
        && (mime.is_empty() || mime == GENERIC_BINARY)
        && extension(filename).as_deref() == Some("pdf")
    {
        "application/pdf".to_string()
    } else {
        let shown = if mime.is_empty() { "unknown" } else { mime.as_str() };
        return Err(Error::Validation(format!(
            "invalid type: {shown} is not accepted for {kind} uploads (allowed: {})",
            kind.accepted_types().join(", ")
        )));
    };

    if size == 0 {
        return Err(Error::Validation("file is empty".to_string()));
    }

    if size > kind.max_bytes() {
        return Err(Error::Validation(format!(
            "file too large: {:.1} MB exceeds the {} MB limit for {kind} uploads",
            size as f64 / MIB as f64,
            kind.max_megabytes()
        )));
    }

    Ok(stored_type)
}

/// `{kind}-{uuid}.{ext}`; the extension comes from the filename, else from the MIME type.
pub fn storage_key(kind: UploadKind, filename: &str, content_type: &str) -> String {
    let ext = extension(filename)
        .or_else(|| extension_for_mime(content_type).map(str::to_string))
        .unwrap_or_else(|| "bin".to_string());
    format!("{}-{}.{}", kind, Uuid::new_v4(), ext)
}

/// Check a caller-hosted file URL: absolute `http`/`https` with a host and
/// no whitespace.
pub fn external_url(raw: &str) -> Result<String> {
    let url = raw.trim();
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| Error::Validation("url must start with http:// or https://".to_string()))?;

    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() || url.chars().any(char::is_whitespace) {
        return Err(Error::Validation(format!("url is not valid: {url}")));
    }

    Ok(url.to_string())
}

fn extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    let valid =
        !ext.is_empty() && ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then_some(ext)
}

fn extension_for_mime(content_type: &str) -> Option<&'static str> {
    let ext = match content_type {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/ogg" => "ogg",
        "audio/mp4" | "audio/x-m4a" => "m4a",
        "audio/aac" => "aac",
        "audio/webm" => "webm",
        "audio/flac" => "flac",
        t if BOOK_TYPES.contains(&t) => "pdf",
        _ => return None,
    };
    Some(ext)
}

fn not_configured() -> Error {
    Error::Configuration(
        "object store is not configured; set OBJECT_STORE_DIR to enable uploads".to_string(),
    )
}

pub struct UploadService {
    store: Option<Arc<dyn ObjectStore>>,
}

impl UploadService {
    pub fn new(store: Option<Arc<dyn ObjectStore>>) -> Self {
        Self { store }
    }

    pub fn is_configured(&self) -> bool {
        self.store.is_some()
    }

    /// Validate, then forward to the object store.
    pub async fn upload(
        &self,
        kind: UploadKind,
        filename: &str,
        content_type: Option<&str>,
        data: Bytes,
    ) -> Result<UploadOutcome> {
        let stored_type = validate_upload(kind, filename, content_type, data.len() as u64)?;
        let store = self.store.as_ref().ok_or_else(not_configured)?;

        let key = storage_key(kind, filename, &stored_type);
        let stored = store.put(&key, data, &stored_type).await.map_err(|e| {
            warn!("[Upload] Object store rejected {}: {}", key, e);
            Error::Upstream(format!("object store rejected {key}: {e}"))
        })?;

        info!(
            "[Upload] Stored {} as {} ({} bytes, {})",
            filename, stored.key, stored.size, stored.content_type
        );

        Ok(UploadOutcome {
            url: stored.url,
            filename: filename.to_string(),
            size: stored.size,
            content_type: stored.content_type,
        })
    }

    /// Read a stored object back for `GET /files/{key}`.
    pub async fn fetch(&self, key: &str) -> Result<(Bytes, ObjectMetadata)> {
        let store = self.store.as_ref().ok_or_else(not_configured)?;

        match store.get(key).await {
            Ok(Some(found)) => Ok(found),
            Ok(None) | Err(BlobError::InvalidKey(_)) => {
                Err(Error::NotFound("file not found".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
