//! Route table
//!
//! Every route is declared once here; anything unmatched falls through to
//! the `route not found` envelope.

use crate::ai::handlers as chat_handlers;
use crate::auth::handlers as auth_handlers;
use crate::books::handlers as book_handlers;
use crate::config::{AppState, CorsOrigins};
use crate::error::{Error, Result};
use crate::middleware::{expose_error_detail, panic_response, preflight};
use crate::upload::handlers as upload_handlers;
use axum::{
    extract::{DefaultBodyLimit, State},
    middleware,
    routing::{get, post},
    Router,
};
use http::HeaderValue;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_request_bytes;
    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/health", get(health))
        // Catalog
        .route(
            "/books",
            get(book_handlers::list_books).post(book_handlers::create_book),
        )
        .route(
            "/books/{id}",
            get(book_handlers::get_book)
                .put(book_handlers::update_book)
                .delete(book_handlers::delete_book),
        )
        .route("/categories", get(book_handlers::list_categories))
        .route("/authors", get(book_handlers::list_authors))
        // Admin
        .route("/admin/stats", get(book_handlers::catalog_stats))
        .route("/admin/login", post(auth_handlers::login))
        // Media
        .route("/upload", post(upload_handlers::upload_file))
        .route(
            "/upload-simple",
            post(upload_handlers::register_external_url),
        )
        .route("/files/{key}", get(upload_handlers::get_file))
        // Chat
        .route("/chat", post(chat_handlers::chat))
        .fallback(route_not_found)
        .method_not_allowed_fallback(route_not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            expose_error_detail,
        ))
        .layer(middleware::from_fn(preflight))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness plus a round trip to the document store.
async fn health(State(state): State<AppState>) -> Result<&'static str> {
    state.documents.ping().await?;
    Ok("OK")
}

async fn route_not_found() -> Error {
    Error::NotFound("route not found".to_string())
}

fn cors_layer(origins: &CorsOrigins) -> CorsLayer {
    match origins {
        CorsOrigins::Any => CorsLayer::permissive(),
        CorsOrigins::List(list) => {
            let allowed: Vec<HeaderValue> = list
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        warn!("Ignoring malformed CORS origin {:?}", origin);
                        None
                    }
                })
                .collect();

            CorsLayer::new()
                .allow_origin(AllowOrigin::list(allowed))
                .allow_methods(Any)
                .allow_headers(Any)
        }
    }
}
