//! Document storage module
//!
//! Schema-flexible JSON documents in named collections, backed by a
//! bounded SQLite connection pool.

pub mod documents;

pub use documents::{DocumentConn, DocumentStore, Filter, FindOptions, SortOrder};
