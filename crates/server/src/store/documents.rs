//! JSON document collections on SQLite
//!
//! Every document is a JSON object stored in the `documents` table next to
//! the name of its collection. The integer primary key is the storage
//! identifier; it never leaks into the documents themselves.
//!
//! A `folded` shadow copy of each body, with every string lowercased in
//! Rust, backs case-insensitive matching. SQLite's `lower()` only folds ASCII.

use crate::error::{Error, Result};
use chrono::Utc;
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions,
};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Pooled handle to the document database. Cheap to clone.
#[derive(Clone, Debug)]
pub struct DocumentStore {
    pool: SqlitePool,
}

impl DocumentStore {
    /// Connect with a pool of at most `max_connections` and create the schema.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    Error::Internal(format!("cannot create database directory {parent:?}: {e}"))
                })?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;

        info!(
            "[Documents] Connected to {} (pool size {})",
            url, max_connections
        );

        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                body TEXT NOT NULL,
                folded TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let has_folded: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pragma_table_info('documents') WHERE name = 'folded'",
        )
        .fetch_one(&self.pool)
        .await?;
        if has_folded == 0 {
            sqlx::query("ALTER TABLE documents ADD COLUMN folded TEXT")
                .execute(&self.pool)
                .await?;
        }
        self.backfill_folded().await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Fill `folded` for rows written before the column existed.
    async fn backfill_folded(&self) -> Result<()> {
        let rows = sqlx::query("SELECT id, body FROM documents WHERE folded IS NULL")
            .fetch_all(&self.pool)
            .await?;
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for row in &rows {
            let id: i64 = row.try_get(0)?;
            let body: String = row.try_get(1)?;
            let doc: Value = serde_json::from_str(&body)?;
            sqlx::query("UPDATE documents SET folded = ? WHERE id = ?")
                .bind(fold_case(&doc).to_string())
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        info!("[Documents] Folded {} existing documents", rows.len());
        Ok(())
    }

    /// Check a connection out of the pool. It goes back when the handle drops.
    pub async fn acquire(&self) -> Result<DocumentConn> {
        let conn = self.pool.acquire().await?;
        Ok(DocumentConn { conn })
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Field-match filter over documents.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    All,
    /// Exact match of one field against a JSON value
    Eq(String, Value),
    /// Case-insensitive substring match against any of the fields
    ContainsIgnoreCase { fields: Vec<String>, needle: String },
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn contains_ignore_case<I, S>(fields: I, needle: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Filter::ContainsIgnoreCase {
            fields: fields.into_iter().map(Into::into).collect(),
            needle: needle.into(),
        }
    }

    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut filters), f) => {
                filters.push(f);
                Filter::And(filters)
            }
            (a, b) => Filter::And(vec![a, b]),
        }
    }

    fn write_sql(&self, sql: &mut String, args: &mut Vec<SqlArg>) {
        match self {
            Filter::All => sql.push_str("1 = 1"),
            Filter::Eq(field, value) => {
                args.push(SqlArg::Text(json_path(field)));
                match value {
                    Value::Null => sql.push_str("json_extract(body, ?) IS NULL"),
                    Value::Bool(b) => {
                        sql.push_str("json_extract(body, ?) = ?");
                        args.push(SqlArg::Int(i64::from(*b)));
                    }
                    Value::Number(n) => {
                        sql.push_str("json_extract(body, ?) = ?");
                        match n.as_i64() {
                            Some(i) => args.push(SqlArg::Int(i)),
                            None => args.push(SqlArg::Real(n.as_f64().unwrap_or_default())),
                        }
                    }
                    Value::String(s) => {
                        sql.push_str("json_extract(body, ?) = ?");
                        args.push(SqlArg::Text(s.clone()));
                    }
                    Value::Array(_) | Value::Object(_) => {
                        sql.push_str("json_extract(body, ?) = json(?)");
                        args.push(SqlArg::Text(value.to_string()));
                    }
                }
            }
            Filter::ContainsIgnoreCase { fields, needle } => {
                if fields.is_empty() {
                    sql.push_str("1 = 0");
                    return;
                }
                let pattern = format!("%{}%", escape_like(&needle.to_lowercase()));
                sql.push('(');
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(" OR ");
                    }
                    sql.push_str("coalesce(json_extract(folded, ?), '') LIKE ? ESCAPE '\\'");
                    args.push(SqlArg::Text(json_path(field)));
                    args.push(SqlArg::Text(pattern.clone()));
                }
                sql.push(')');
            }
            Filter::And(filters) => {
                if filters.is_empty() {
                    sql.push_str("1 = 1");
                    return;
                }
                sql.push('(');
                for (i, filter) in filters.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(" AND ");
                    }
                    filter.write_sql(sql, args);
                }
                sql.push(')');
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct FindOptions {
    /// Sort field; ties break by insertion order in the same direction
    pub sort: Option<(String, SortOrder)>,
    pub skip: u64,
    pub limit: Option<u64>,
}

impl FindOptions {
    pub fn sorted_by(field: impl Into<String>, order: SortOrder) -> Self {
        Self {
            sort: Some((field.into(), order)),
            ..Self::default()
        }
    }

    pub fn page(mut self, skip: u64, limit: u64) -> Self {
        self.skip = skip;
        self.limit = Some(limit);
        self
    }
}

#[derive(Clone, Debug)]
enum SqlArg {
    Text(String),
    Int(i64),
    Real(f64),
}

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_args(mut query: SqliteQuery<'_>, args: Vec<SqlArg>) -> SqliteQuery<'_> {
    for arg in args {
        query = match arg {
            SqlArg::Text(s) => query.bind(s),
            SqlArg::Int(i) => query.bind(i),
            SqlArg::Real(f) => query.bind(f),
        };
    }
    query
}

fn json_path(field: &str) -> String {
    format!("$.{field}")
}

/// Lowercase every string in `doc`, keys excepted.
fn fold_case(doc: &Value) -> Value {
    match doc {
        Value::String(s) => Value::String(s.to_lowercase()),
        Value::Array(items) => Value::Array(items.iter().map(fold_case).collect()),
        Value::Object(map) => {
            Value::Object(map.iter().map(|(k, v)| (k.clone(), fold_case(v))).collect())
        }
        other => other.clone(),
    }
}

fn escape_like(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn u64_arg(n: u64) -> SqlArg {
    SqlArg::Int(i64::try_from(n).unwrap_or(i64::MAX))
}

/// A pooled connection scoped to one unit of work.
pub struct DocumentConn {
    conn: PoolConnection<Sqlite>,
}

impl DocumentConn {
    pub async fn collection_exists(&mut self, collection: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM collections WHERE name = ?")
            .bind(collection)
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(row.is_some())
    }

    pub async fn create_collection(&mut self, collection: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO collections (name, created_at) VALUES (?, ?)")
            .bind(collection)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }

    /// Insert one JSON object, creating the collection on first use.
    pub async fn insert_one(&mut self, collection: &str, doc: &Value) -> Result<()> {
        ensure_object(doc)?;
        self.create_collection(collection).await?;

        sqlx::query("INSERT INTO documents (collection, body, folded) VALUES (?, ?, ?)")
            .bind(collection)
            .bind(doc.to_string())
            .bind(fold_case(doc).to_string())
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }

    /// Insert all documents in one transaction.
    pub async fn insert_many(&mut self, collection: &str, docs: &[Value]) -> Result<u64> {
        for doc in docs {
            ensure_object(doc)?;
        }
        self.create_collection(collection).await?;

        let mut tx = sqlx::Connection::begin(&mut *self.conn).await?;
        for doc in docs {
            sqlx::query("INSERT INTO documents (collection, body, folded) VALUES (?, ?, ?)")
                .bind(collection)
                .bind(doc.to_string())
                .bind(fold_case(doc).to_string())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(docs.len() as u64)
    }

    pub async fn find_one(&mut self, collection: &str, filter: &Filter) -> Result<Option<Value>> {
        let mut docs = self
            .find(collection, filter, &FindOptions::default().page(0, 1))
            .await?;
        Ok(docs.pop())
    }

    pub async fn find(
        &mut self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Value>> {
        let mut sql = String::from("SELECT body FROM documents WHERE collection = ? AND ");
        let mut args = vec![SqlArg::Text(collection.to_string())];
        filter.write_sql(&mut sql, &mut args);

        match &options.sort {
            Some((field, order)) => {
                let order = order.as_sql();
                sql.push_str(&format!(
                    " ORDER BY json_extract(body, ?) {order}, id {order}"
                ));
                args.push(SqlArg::Text(json_path(field)));
            }
            None => sql.push_str(" ORDER BY id ASC"),
        }

        match options.limit {
            Some(limit) => {
                sql.push_str(" LIMIT ? OFFSET ?");
                args.push(u64_arg(limit));
                args.push(u64_arg(options.skip));
            }
            None if options.skip > 0 => {
                sql.push_str(" LIMIT -1 OFFSET ?");
                args.push(u64_arg(options.skip));
            }
            None => {}
        }

        debug!("[Documents] {}", sql);

        let rows = bind_args(sqlx::query(&sql), args)
            .fetch_all(&mut *self.conn)
            .await?;

        rows.iter()
            .map(|row| -> Result<Value> {
                let body: String = row.try_get(0)?;
                Ok(serde_json::from_str(&body)?)
            })
            .collect()
    }

    pub async fn count(&mut self, collection: &str, filter: &Filter) -> Result<u64> {
        let mut sql = String::from("SELECT COUNT(*) FROM documents WHERE collection = ? AND ");
        let mut args = vec![SqlArg::Text(collection.to_string())];
        filter.write_sql(&mut sql, &mut args);

        let row = bind_args(sqlx::query(&sql), args)
            .fetch_one(&mut *self.conn)
            .await?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    /// Replace the body of the first matching document. Returns whether one matched.
    pub async fn replace_one(
        &mut self,
        collection: &str,
        filter: &Filter,
        doc: &Value,
    ) -> Result<bool> {
        ensure_object(doc)?;

        let mut sql = String::from(
            "UPDATE documents SET body = ?, folded = ? WHERE id = \
             (SELECT id FROM documents WHERE collection = ? AND ",
        );
        let mut args = vec![
            SqlArg::Text(doc.to_string()),
            SqlArg::Text(fold_case(doc).to_string()),
            SqlArg::Text(collection.to_string()),
        ];
        filter.write_sql(&mut sql, &mut args);
        sql.push_str(" ORDER BY id LIMIT 1)");

        let result = bind_args(sqlx::query(&sql), args)
            .execute(&mut *self.conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove the first matching document. Returns whether one matched.
    pub async fn delete_one(&mut self, collection: &str, filter: &Filter) -> Result<bool> {
        let mut sql = String::from(
            "DELETE FROM documents WHERE id = \
             (SELECT id FROM documents WHERE collection = ? AND ",
        );
        let mut args = vec![SqlArg::Text(collection.to_string())];
        filter.write_sql(&mut sql, &mut args);
        sql.push_str(" ORDER BY id LIMIT 1)");

        let result = bind_args(sqlx::query(&sql), args)
            .execute(&mut *self.conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_many(&mut self, collection: &str, filter: &Filter) -> Result<u64> {
        let mut sql = String::from("DELETE FROM documents WHERE collection = ? AND ");
        let mut args = vec![SqlArg::Text(collection.to_string())];
        filter.write_sql(&mut sql, &mut args);

        let result = bind_args(sqlx::query(&sql), args)
            .execute(&mut *self.conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Distinct non-null values of `field`, in no particular order.
    pub async fn distinct(&mut self, collection: &str, field: &str) -> Result<Vec<Value>> {
        let path = json_path(field);
        let rows = sqlx::query(
            "SELECT DISTINCT json_quote(json_extract(body, ?)) FROM documents \
             WHERE collection = ? AND json_extract(body, ?) IS NOT NULL",
        )
        .bind(path.as_str())
        .bind(collection)
        .bind(path.as_str())
        .fetch_all(&mut *self.conn)
        .await?;

        rows.iter()
            .map(|row| -> Result<Value> {
                let raw: String = row.try_get(0)?;
                Ok(serde_json::from_str(&raw)?)
            })
            .collect()
    }
}

fn ensure_object(doc: &Value) -> Result<()> {
    if doc.is_object() {
        Ok(())
    } else {
        Err(Error::Internal("documents must be JSON objects".to_string()))
    }
}
