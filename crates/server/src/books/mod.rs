//! Book Catalog
//!
//! CRUD plus filtered, paginated listing over the `books` collection.
//! Each operation checks one connection out of the document pool and
//! hands it back when the operation returns.

pub mod handlers;

use crate::config::DEFAULT_PAGE_SIZE;
use crate::error::{Error, Result};
use crate::models::{self, Book, RESERVED_BOOK_KEYS};
use crate::store::{DocumentStore, Filter, FindOptions, SortOrder};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

pub const BOOKS: &str = "books";

/// Filter value meaning "no filter" for category and author.
const ALL: &str = "all";

const SEARCH_FIELDS: [&str; 3] = ["title", "author", "description"];

const SAMPLE_BOOKS: &str = include_str!("../../seed/books.json");

/// Listing request. Missing or out-of-range paging falls back to defaults.
#[derive(Debug, Clone, Default)]
pub struct BookQuery {
    pub category: Option<String>,
    pub author: Option<String>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStats {
    pub total_books: u64,
    pub total_categories: u64,
    pub total_authors: u64,
}

pub struct BookCatalog {
    documents: DocumentStore,
    max_page_size: u32,
}

impl BookCatalog {
    pub fn new(documents: DocumentStore, max_page_size: u32) -> Self {
        Self {
            documents,
            max_page_size: max_page_size.max(1),
        }
    }

    /// Newest first, filtered by category/author (exact) and search (substring, any case).
    pub async fn list(&self, query: &BookQuery) -> Result<Page<Book>> {
        let page_size = match query.page_size {
            Some(size) if size >= 1 => size.min(self.max_page_size),
            _ => DEFAULT_PAGE_SIZE.min(self.max_page_size),
        };
        let page = query.page.filter(|p| *p >= 1).unwrap_or(1);
        let filter = list_filter(query);

        let mut conn = self.documents.acquire().await?;
        let total = conn.count(BOOKS, &filter).await?;

        let skip = u64::from(page - 1) * u64::from(page_size);
        let options = FindOptions::sorted_by("createdAt", SortOrder::Descending)
            .page(skip, u64::from(page_size));
        let items = conn
            .find(BOOKS, &filter, &options)
            .await?
            .into_iter()
            .map(parse_book)
            .collect::<Result<Vec<_>>>()?;

        let total_pages = total.div_ceil(u64::from(page_size));

        Ok(Page {
            items,
            page,
            page_size,
            total,
            total_pages,
            has_next: u64::from(page) < total_pages,
            has_prev: page > 1,
        })
    }

    pub async fn get(&self, id: &str) -> Result<Book> {
        let mut conn = self.documents.acquire().await?;
        let doc = conn
            .find_one(BOOKS, &by_id(id))
            .await?
            .ok_or_else(not_found)?;
        parse_book(doc)
    }

    /// Validate caller fields, assign `id` and both timestamps, store.
    pub async fn create(&self, fields: Value) -> Result<Book> {
        let book = new_book(fields)?;

        let mut conn = self.documents.acquire().await?;
        conn.insert_one(BOOKS, &serde_json::to_value(&book)?).await?;

        info!("[Books] Created {} ({})", book.id, book.title);
        Ok(book)
    }

    /// Merge `patch` over the stored book. Server-owned keys in the patch are
    /// ignored, `updatedAt` always moves forward, an empty patch succeeds.
    pub async fn update(&self, id: &str, patch: Value) -> Result<Book> {
        let mut patch = into_object(patch)?;
        strip_reserved(&mut patch);

        let mut conn = self.documents.acquire().await?;
        let filter = by_id(id);
        let current = conn.find_one(BOOKS, &filter).await?.ok_or_else(not_found)?;
        let previous = parse_book(current.clone())?;

        let mut doc = into_object(current)?;
        doc.remove("_id");
        doc.extend(patch);

        let updated_at = models::now().max(previous.updated_at + Duration::microseconds(1));
        doc.insert("updatedAt".to_string(), timestamp_value(updated_at));

        let book = validate(doc)?;

        if !conn
            .replace_one(BOOKS, &filter, &serde_json::to_value(&book)?)
            .await?
        {
            return Err(not_found());
        }

        info!("[Books] Updated {}", book.id);
        Ok(book)
    }

    /// Hard delete. Referenced media stay in the object store.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut conn = self.documents.acquire().await?;
        if !conn.delete_one(BOOKS, &by_id(id)).await? {
            return Err(not_found());
        }

        info!("[Books] Deleted {}", id);
        Ok(())
    }

    /// Bulk-insert books in one transaction, optionally emptying the catalog first.
    /// Every entry is validated before anything is written.
    pub async fn import(&self, entries: Vec<Value>, replace: bool) -> Result<Vec<Book>> {
        let books = entries
            .into_iter()
            .map(new_book)
            .collect::<Result<Vec<_>>>()?;
        let docs = books
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut conn = self.documents.acquire().await?;
        if replace {
            let removed = conn.delete_many(BOOKS, &Filter::All).await?;
            info!("[Books] Removed {} existing books", removed);
        }
        conn.insert_many(BOOKS, &docs).await?;

        info!("[Books] Imported {} books", books.len());
        Ok(books)
    }

    pub async fn categories(&self) -> Result<Vec<String>> {
        self.distinct_strings("category").await
    }

    pub async fn authors(&self) -> Result<Vec<String>> {
        self.distinct_strings("author").await
    }

    pub async fn stats(&self) -> Result<CatalogStats> {
        let mut conn = self.documents.acquire().await?;
        let total_books = conn.count(BOOKS, &Filter::All).await?;
        let total_categories = strings(conn.distinct(BOOKS, "category").await?).len() as u64;
        let total_authors = strings(conn.distinct(BOOKS, "author").await?).len() as u64;

        Ok(CatalogStats {
            total_books,
            total_categories,
            total_authors,
        })
    }

    async fn distinct_strings(&self, field: &str) -> Result<Vec<String>> {
        let mut conn = self.documents.acquire().await?;
        Ok(strings(conn.distinct(BOOKS, field).await?))
    }
}

/// The sample catalog shipped with the server.
pub fn sample_books() -> Result<Vec<Value>> {
    Ok(serde_json::from_str(SAMPLE_BOOKS)?)
}

fn new_book(fields: Value) -> Result<Book> {
    let mut doc = into_object(fields)?;
    strip_reserved(&mut doc);

    let now = models::now();
    doc.insert("id".to_string(), Value::String(models::new_book_id()));
    doc.insert("createdAt".to_string(), timestamp_value(now));
    doc.insert("updatedAt".to_string(), timestamp_value(now));

    validate(doc)
}

fn list_filter(query: &BookQuery) -> Filter {
    let mut filter = Filter::All;

    if let Some(category) = selected(&query.category) {
        filter = filter.and(Filter::eq("category", category));
    }
    if let Some(author) = selected(&query.author) {
        filter = filter.and(Filter::eq("author", author));
    }
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        filter = filter.and(Filter::contains_ignore_case(SEARCH_FIELDS, search));
    }

    filter
}

fn selected(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty() && *v != ALL)
}

fn by_id(id: &str) -> Filter {
    Filter::eq("id", id)
}

fn not_found() -> Error {
    Error::NotFound("book not found".to_string())
}

fn into_object(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(Error::Validation("book must be a JSON object".to_string())),
    }
}

fn strip_reserved(doc: &mut Map<String, Value>) {
    for key in RESERVED_BOOK_KEYS {
        doc.remove(key);
    }
}

fn timestamp_value(at: DateTime<Utc>) -> Value {
    Value::String(models::timestamp::format(&at))
}

/// Typed view of a caller-shaped document; title, author and category must be non-empty.
fn validate(doc: Map<String, Value>) -> Result<Book> {
    let book: Book = serde_json::from_value(Value::Object(doc))
        .map_err(|e| Error::Validation(format!("invalid book: {e}")))?;

    for (field, value) in [
        ("title", &book.title),
        ("author", &book.author),
        ("category", &book.category),
    ] {
        if value.trim().is_empty() {
            return Err(Error::Validation(format!("{field} is required")));
        }
    }

    Ok(book)
}

fn parse_book(doc: Value) -> Result<Book> {
    Ok(serde_json::from_value(doc)?)
}

fn strings(values: Vec<Value>) -> Vec<String> {
    values
        .into_iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::documents::tests::temp_store;
    use serde_json::json;
    use std::collections::HashSet;
    use tempfile::TempDir;

    async fn catalog() -> (TempDir, BookCatalog) {
        let (dir, store) = temp_store().await;
        (dir, BookCatalog::new(store, 1000))
    }

    fn book(title: &str, author: &str, category: &str) -> Value {
        json!({ "title": title, "author": author, "category": category })
    }

    #[tokio::test]
    async fn create_assigns_id_and_timestamps() {
        let (_dir, catalog) = catalog().await;

        let created = catalog
            .create(book("Dune", "Frank Herbert", "Science-Fiction"))
            .await
            .unwrap();

        assert_eq!(created.title, "Dune");
        assert_eq!(created.author, "Frank Herbert");
        assert_eq!(created.category, "Science-Fiction");
        assert!(!created.id.is_empty());
        assert_eq!(created.created_at, created.updated_at);
        assert_eq!(catalog.get(&created.id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn create_ignores_caller_supplied_identity() {
        let (_dir, catalog) = catalog().await;

        let created = catalog
            .create(json!({
                "id": "mine",
                "_id": "internal",
                "createdAt": "1999-01-01T00:00:00.000000Z",
                "title": "Sapiens",
                "author": "Yuval Noah Harari",
                "category": "History",
                "pages": 498
            }))
            .await
            .unwrap();

        assert_ne!(created.id, "mine");
        assert!(created.extra.get("_id").is_none());
        assert_eq!(created.extra.get("pages"), Some(&json!(498)));
        assert!(created.created_at.to_rfc3339().starts_with("20"));
    }

    #[tokio::test]
    async fn create_requires_title_author_and_category() {
        let (_dir, catalog) = catalog().await;

        for fields in [
            json!({ "author": "A", "category": "C" }),
            json!({ "title": "  ", "author": "A", "category": "C" }),
            json!({ "title": "T", "author": "A" }),
            json!({ "title": "T", "author": "A", "category": "C", "year": "soon" }),
            json!(["not", "an", "object"]),
        ] {
            let err = catalog.create(fields.clone()).await.unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{fields} gave {err:?}");
        }
    }

    #[tokio::test]
    async fn generated_ids_do_not_collide() {
        let ids: HashSet<String> = (0..10_000).map(|_| models::new_book_id()).collect();
        assert_eq!(ids.len(), 10_000);

        let (_dir, catalog) = catalog().await;
        let mut stored = HashSet::new();
        for i in 0..200 {
            let created = catalog
                .create(book(&format!("Book {i}"), "Author", "Fiction"))
                .await
                .unwrap();
            stored.insert(created.id);
        }
        assert_eq!(stored.len(), 200);
    }

    #[tokio::test]
    async fn second_page_holds_sixth_to_tenth_newest() {
        let (_dir, catalog) = catalog().await;
        for i in 0..12 {
            catalog
                .create(book(&format!("Book {i}"), "Author", "Fiction"))
                .await
                .unwrap();
        }

        let page = catalog
            .list(&BookQuery {
                page: Some(2),
                page_size: Some(5),
                ..BookQuery::default()
            })
            .await
            .unwrap();

        let titles: Vec<_> = page.items.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles, vec!["Book 6", "Book 5", "Book 4", "Book 3", "Book 2"]);
        assert_eq!(page.total, 12);
        assert_eq!(page.total_pages, 3);
        assert!(page.has_next);
        assert!(page.has_prev);
        assert!(page
            .items
            .windows(2)
            .all(|w| w[0].created_at >= w[1].created_at));
    }

    #[tokio::test]
    async fn paging_defaults_and_bounds() {
        let (dir, store) = temp_store().await;
        let catalog = BookCatalog::new(store, 5);
        for i in 0..14 {
            catalog
                .create(book(&format!("Book {i}"), "Author", "Fiction"))
                .await
                .unwrap();
        }

        let page = catalog
            .list(&BookQuery {
                page: Some(0),
                page_size: Some(500),
                ..BookQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, 5);
        assert_eq!(page.items.len(), 5);
        assert!(!page.has_prev);

        let past_end = catalog
            .list(&BookQuery {
                page: Some(9),
                ..BookQuery::default()
            })
            .await
            .unwrap();
        assert!(past_end.items.is_empty());
        assert!(!past_end.has_next);
        drop(dir);
    }

    #[tokio::test]
    async fn default_page_size_is_twelve() {
        let (_dir, catalog) = catalog().await;
        for i in 0..13 {
            catalog
                .create(book(&format!("Book {i}"), "Author", "Fiction"))
                .await
                .unwrap();
        }
        let page = catalog.list(&BookQuery::default()).await.unwrap();
        assert_eq!(page.page_size, 12);
        assert_eq!(page.items.len(), 12);
        assert_eq!(page.total_pages, 2);
    }

    #[tokio::test]
    async fn filters_are_exact_and_search_is_case_insensitive() {
        let (_dir, catalog) = catalog().await;
        catalog
            .create(book("Dune", "Frank Herbert", "Science-Fiction"))
            .await
            .unwrap();
        catalog
            .create(book("Sapiens", "Yuval Noah Harari", "History"))
            .await
            .unwrap();
        catalog
            .create(json!({
                "title": "1984",
                "author": "George Orwell",
                "category": "Science-Fiction",
                "description": "Big Brother is watching"
            }))
            .await
            .unwrap();

        let search = |s: &str| BookQuery {
            search: Some(s.to_string()),
            ..BookQuery::default()
        };

        let found = catalog.list(&search("dune")).await.unwrap();
        assert_eq!(found.total, 1);
        assert_eq!(found.items[0].title, "Dune");

        assert_eq!(catalog.list(&search("HARARI")).await.unwrap().total, 1);
        assert_eq!(catalog.list(&search("brother")).await.unwrap().total, 1);

        let scifi = BookQuery {
            category: Some("Science-Fiction".to_string()),
            ..BookQuery::default()
        };
        assert_eq!(catalog.list(&scifi).await.unwrap().total, 2);

        let lowercase = BookQuery {
            category: Some("science-fiction".to_string()),
            ..BookQuery::default()
        };
        assert_eq!(catalog.list(&lowercase).await.unwrap().total, 0);

        let everything = BookQuery {
            category: Some("all".to_string()),
            author: Some("all".to_string()),
            ..BookQuery::default()
        };
        assert_eq!(catalog.list(&everything).await.unwrap().total, 3);

        let orwell = BookQuery {
            author: Some("George Orwell".to_string()),
            search: Some("big".to_string()),
            ..BookQuery::default()
        };
        assert_eq!(catalog.list(&orwell).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn update_changes_fields_and_advances_updated_at() {
        let (_dir, catalog) = catalog().await;
        let created = catalog
            .create(book("Dune", "Frank Herbert", "Science-Fiction"))
            .await
            .unwrap();

        let updated = catalog
            .update(
                &created.id,
                json!({
                    "title": "X",
                    "id": "hijack",
                    "createdAt": "2000-01-01T00:00:00.000000Z",
                    "pages": 412
                }),
            )
            .await
            .unwrap();

        let fetched = catalog.get(&created.id).await.unwrap();
        assert_eq!(fetched, updated);
        assert_eq!(fetched.title, "X");
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.created_at, created.created_at);
        assert!(fetched.updated_at > created.updated_at);
        assert_eq!(fetched.extra.get("pages"), Some(&json!(412)));
    }

    #[tokio::test]
    async fn empty_update_succeeds() {
        let (_dir, catalog) = catalog().await;
        let created = catalog
            .create(book("Dune", "Frank Herbert", "Science-Fiction"))
            .await
            .unwrap();

        let updated = catalog.update(&created.id, json!({})).await.unwrap();
        assert_eq!(updated.title, created.title);
        assert!(updated.updated_at > created.updated_at);
    }

    #[tokio::test]
    async fn update_cannot_blank_required_fields() {
        let (_dir, catalog) = catalog().await;
        let created = catalog
            .create(book("Dune", "Frank Herbert", "Science-Fiction"))
            .await
            .unwrap();

        let err = catalog
            .update(&created.id, json!({ "title": "" }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = catalog
            .update(&created.id, json!({ "author": null }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        assert_eq!(catalog.get(&created.id).await.unwrap().title, "Dune");
    }

    #[tokio::test]
    async fn update_of_unknown_id_is_not_found() {
        let (_dir, catalog) = catalog().await;
        let err = catalog
            .update("missing", json!({ "title": "X" }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let (_dir, catalog) = catalog().await;
        let created = catalog
            .create(book("Dune", "Frank Herbert", "Science-Fiction"))
            .await
            .unwrap();

        catalog.delete(&created.id).await.unwrap();

        assert!(matches!(
            catalog.get(&created.id).await.unwrap_err(),
            Error::NotFound(_)
        ));
        assert!(matches!(
            catalog.delete(&created.id).await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn sample_catalog_imports_and_replaces() {
        let (_dir, catalog) = catalog().await;
        catalog.create(book("Old", "Someone", "Misc")).await.unwrap();

        let samples = sample_books().unwrap();
        let imported = catalog.import(samples.clone(), true).await.unwrap();
        assert_eq!(imported.len(), samples.len());

        let stats = catalog.stats().await.unwrap();
        assert_eq!(stats.total_books, samples.len() as u64);

        let art_of_war = catalog
            .list(&BookQuery {
                search: Some("sun tzu".to_string()),
                ..BookQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(art_of_war.items[0].year, Some(-500));

        catalog.import(samples.clone(), false).await.unwrap();
        assert_eq!(
            catalog.stats().await.unwrap().total_books,
            2 * samples.len() as u64
        );
    }

    #[tokio::test]
    async fn import_is_all_or_nothing() {
        let (_dir, catalog) = catalog().await;
        let err = catalog
            .import(vec![book("A", "B", "C"), json!({ "title": "missing fields" })], false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(catalog.stats().await.unwrap().total_books, 0);
    }

    #[tokio::test]
    async fn distinct_categories_and_stats() {
        let (_dir, catalog) = catalog().await;
        catalog.create(book("A", "Ann", "Fiction")).await.unwrap();
        catalog.create(book("B", "Ann", "Fiction")).await.unwrap();
        catalog.create(book("C", "Bob", "History")).await.unwrap();

        let mut categories = catalog.categories().await.unwrap();
        categories.sort();
        assert_eq!(categories, vec!["Fiction", "History"]);

        let mut authors = catalog.authors().await.unwrap();
        authors.sort();
        assert_eq!(authors, vec!["Ann", "Bob"]);

        assert_eq!(
            catalog.stats().await.unwrap(),
            CatalogStats {
                total_books: 3,
                total_categories: 2,
                total_authors: 2,
            }
        );
    }
}
