//! Upload handlers
//!
//! `POST /upload` takes a multipart form with a `file` part and a `type`
//! part (`book`, `cover` or `audio`). Uploads are buffered in memory, so
//! the request body ceiling bounds what a single upload may cost.
//!
//! `POST /upload-simple` stores nothing: it registers a file the caller
//! already hosts, given as a `url` form part.

use super::{external_url, UploadKind, UploadOutcome};
use crate::config::AppState;
use crate::error::{Error, Result};
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, Path, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: UploadOutcome,
}

struct FilePart {
    filename: String,
    content_type: Option<String>,
    data: Bytes,
}

/// POST /upload
pub async fn upload_file(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>> {
    let mut multipart = multipart?;
    let limit = state.config.max_request_bytes;

    let mut declared_type = None;
    let mut file = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| read_error(e, limit))?
    {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "file" => {
                let filename = field
                    .file_name()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "upload".to_string());
                let content_type = field.content_type().map(|s| s.to_string());
                let data = field.bytes().await.map_err(|e| read_error(e, limit))?;
                file = Some(FilePart {
                    filename,
                    content_type,
                    data,
                });
            }
            "type" => {
                declared_type = Some(field.text().await.map_err(|e| read_error(e, limit))?);
            }
            _ => {}
        }
    }

    let kind: UploadKind = declared_type
        .ok_or_else(|| Error::Validation("type is required".to_string()))?
        .parse()?;
    let file = file.ok_or_else(|| Error::Validation("file is required".to_string()))?;

    info!(
        "POST /upload - {} ({}, {} bytes, {:?})",
        file.filename,
        kind,
        file.data.len(),
        file.content_type
    );

    let outcome = state
        .uploads
        .upload(kind, &file.filename, file.content_type.as_deref(), file.data)
        .await?;

    Ok(Json(UploadResponse {
        success: true,
        outcome,
    }))
}

#[derive(Debug, Serialize)]
pub struct ExternalUrlResponse {
    pub success: bool,
    pub url: String,
    pub method: &'static str,
}

/// POST /upload-simple
pub async fn register_external_url(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Response> {
    let mut multipart = multipart?;
    let limit = state.config.max_request_bytes;

    let mut url = None;
    let mut declared_type = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| read_error(e, limit))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let slot = match name.as_str() {
            "url" => &mut url,
            "type" => &mut declared_type,
            _ => continue,
        };
        *slot = Some(field.text().await.map_err(|e| read_error(e, limit))?);
    }

    if let Some(declared) = declared_type.as_deref() {
        declared.parse::<UploadKind>()?;
    }

    let Some(url) = url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty()) else {
        info!("POST /upload-simple - no url given");
        let body = json!({
            "success": false,
            "error": "direct upload is not available on this route",
            "instructions": [
                "1. Upload the file to a hosting service",
                "2. Copy its public URL",
                "3. Send that URL in the \"url\" form field"
            ],
            "exampleRequest": { "url": "https://example.com/image.jpg", "type": "cover" }
        });
        return Ok((StatusCode::BAD_REQUEST, Json(body)).into_response());
    };

    let url = external_url(&url)?;
    info!("POST /upload-simple - {}", url);

    Ok(Json(ExternalUrlResponse {
        success: true,
        url,
        method: "external_url",
    })
    .into_response())
}

/// GET /files/{key}
pub async fn get_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response> {
    info!("GET /files/{}", key);

    let (data, meta) = state.uploads.fetch(&key).await?;
    Ok(([(header::CONTENT_TYPE, meta.content_type)], data).into_response())
}

fn read_error(err: MultipartError, limit: usize) -> Error {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        warn!("[Upload] Request body over {} bytes", limit);
        return Error::Validation(format!(
            "file too large: request exceeds the {} MB limit",
            limit / (1024 * 1024)
        ));
    }
    Error::Validation(err.body_text())
}
