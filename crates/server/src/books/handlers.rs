//! Book handlers

use super::{BookQuery, CatalogStats, Page};
use crate::config::AppState;
use crate::error::{ApiJson, Result};
use crate::models::Book;
use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

/// Query string of `GET /books`. Paging values that do not parse are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct ListBooksParams {
    pub category: Option<String>,
    pub author: Option<String>,
    pub search: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl ListBooksParams {
    fn into_query(self) -> BookQuery {
        BookQuery {
            category: self.category,
            author: self.author,
            search: self.search,
            page: lenient_u32(self.page.as_deref()),
            page_size: lenient_u32(self.limit.as_deref()),
        }
    }
}

fn lenient_u32(raw: Option<&str>) -> Option<u32> {
    raw.and_then(|v| v.trim().parse().ok())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

#[derive(Debug, Serialize)]
pub struct BookListResponse {
    pub success: bool,
    pub books: Vec<Book>,
    pub pagination: Pagination,
}

impl From<Page<Book>> for BookListResponse {
    fn from(page: Page<Book>) -> Self {
        Self {
            success: true,
            pagination: Pagination {
                page: page.page,
                limit: page.page_size,
                total: page.total,
                total_pages: page.total_pages,
                has_next: page.has_next,
                has_prev: page.has_prev,
            },
            books: page.items,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BookResponse {
    pub success: bool,
    pub book: Book,
}

impl BookResponse {
    fn ok(book: Book) -> Json<Self> {
        Json(Self {
            success: true,
            book,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct CategoriesResponse {
    pub success: bool,
    pub categories: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthorsResponse {
    pub success: bool,
    pub authors: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub success: bool,
    pub stats: CatalogStats,
}

/// GET /books
pub async fn list_books(
    State(state): State<AppState>,
    params: std::result::Result<Query<ListBooksParams>, QueryRejection>,
) -> Result<Json<BookListResponse>> {
    let Query(params) = params?;
    info!(
        "GET /books - category={:?} author={:?} search={:?} page={:?} limit={:?}",
        params.category, params.author, params.search, params.page, params.limit
    );

    let page = state.books.list(&params.into_query()).await?;
    Ok(Json(page.into()))
}

/// GET /books/{id}
pub async fn get_book(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BookResponse>> {
    info!("GET /books/{}", id);
    Ok(BookResponse::ok(state.books.get(&id).await?))
}

/// POST /books
pub async fn create_book(
    State(state): State<AppState>,
    ApiJson(fields): ApiJson<Value>,
) -> Result<(StatusCode, Json<BookResponse>)> {
    info!("POST /books");
    let book = state.books.create(fields).await?;
    Ok((StatusCode::CREATED, BookResponse::ok(book)))
}

/// PUT /books/{id}
pub async fn update_book(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<Value>,
) -> Result<Json<BookResponse>> {
    info!("PUT /books/{}", id);
    Ok(BookResponse::ok(state.books.update(&id, patch).await?))
}

/// DELETE /books/{id}
pub async fn delete_book(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>> {
    info!("DELETE /books/{}", id);
    state.books.delete(&id).await?;
    Ok(Json(DeleteResponse {
        success: true,
        message: "book deleted".to_string(),
    }))
}

/// GET /categories
pub async fn list_categories(State(state): State<AppState>) -> Result<Json<CategoriesResponse>> {
    let mut categories = state.books.categories().await?;
    categories.sort();
    Ok(Json(CategoriesResponse {
        success: true,
        categories,
    }))
}

/// GET /authors
pub async fn list_authors(State(state): State<AppState>) -> Result<Json<AuthorsResponse>> {
    let mut authors = state.books.authors().await?;
    authors.sort();
    Ok(Json(AuthorsResponse {
        success: true,
        authors,
    }))
}

/// GET /admin/stats
pub async fn catalog_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    Ok(Json(StatsResponse {
        success: true,
        stats: state.books.stats().await?,
    }))
}
