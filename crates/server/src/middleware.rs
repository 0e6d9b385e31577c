use crate::config::AppState;
use crate::error::{Error, ErrorDetail};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::any::Any;
use tracing::debug;

/// Answer every `OPTIONS` request with an empty 200. The CORS layer adds the headers.
pub async fn preflight(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        debug!("OPTIONS {} - preflight", req.uri().path());
        return StatusCode::OK.into_response();
    }
    next.run(req).await
}

/// In development, copy the full error text of 500 responses into a `detail` field.
pub async fn expose_error_detail(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let response = next.run(req).await;
    if state.config.mode.is_production() {
        return response;
    }

    let Some(detail) = response.extensions().get::<ErrorDetail>().cloned() else {
        return response;
    };

    let (mut parts, _) = response.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    let body = json!({
        "success": false,
        "error": detail.message,
        "detail": detail.detail,
    });
    Response::from_parts(parts, Body::from(body.to_string()))
}

/// Turn a handler panic into the 500 envelope.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };

    Error::Internal(format!("handler panicked: {detail}")).into_response()
}
