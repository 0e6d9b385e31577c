//! Admin auth handlers

use crate::config::AppState;
use crate::error::{ApiJson, Result};
use crate::models::AdminUser;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: AdminUser,
}

/// POST /admin/login
pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    info!("POST /admin/login - {}", req.email);

    let user = state.auth.login(&req.email, &req.password).await?;
    Ok(Json(LoginResponse {
        success: true,
        user,
    }))
}
