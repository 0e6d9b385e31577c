use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One catalog entry.
///
/// Fields outside the known set are kept in `extra` and round-trip untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author: String,
    pub category: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub pdf_url: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Keys the server owns; callers cannot set them on create or update.
pub const RESERVED_BOOK_KEYS: [&str; 4] = ["id", "_id", "createdAt", "updatedAt"];

/// Fresh external identifier for a book.
pub fn new_book_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current time at the precision timestamps are stored with.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Stored administrator, including the password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminAccount {
    pub id: String,
    pub name: String,
    pub email: String,
    /// bcrypt hash, never plaintext
    #[serde(rename = "password")]
    pub password_hash: String,
    pub role: String,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

/// Public admin info (no sensitive data)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
}

impl From<AdminAccount> for AdminUser {
    fn from(account: AdminAccount) -> Self {
        Self {
            id: account.id,
            name: account.name,
            email: account.email,
            role: account.role,
        }
    }
}

/// RFC 3339 with fixed microsecond precision, so stored values sort as text.
pub mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(value: &DateTime<Utc>) -> String {
        value.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn book_keeps_unknown_fields() {
        let book: Book = serde_json::from_value(json!({
            "id": "b1",
            "title": "Dune",
            "author": "Frank Herbert",
            "category": "Science-Fiction",
            "year": 1965,
            "pages": 412,
            "createdAt": "2024-05-01T10:00:00.000000Z",
            "updatedAt": "2024-05-01T10:00:00.000000Z"
        }))
        .unwrap();

        assert_eq!(book.extra.get("pages"), Some(&json!(412)));
        assert!(book.cover_image.is_none());

        let value = serde_json::to_value(&book).unwrap();
        assert_eq!(value["pages"], 412);
        assert_eq!(value["createdAt"], "2024-05-01T10:00:00.000000Z");
    }

    #[test]
    fn timestamps_have_fixed_width() {
        #[derive(Serialize)]
        struct Stamp(#[serde(with = "timestamp")] DateTime<Utc>);

        let a = "2024-05-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let b = a + chrono::Duration::microseconds(500);
        let a = serde_json::to_string(&Stamp(a)).unwrap();
        let b = serde_json::to_string(&Stamp(b)).unwrap();

        assert_eq!(a, "\"2024-05-01T10:00:00.000000Z\"");
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }

    #[test]
    fn negative_years_are_allowed() {
        let book: Book = serde_json::from_value(json!({
            "id": "b2",
            "title": "The Art of War",
            "author": "Sun Tzu",
            "category": "Philosophy",
            "year": -500,
            "createdAt": "2024-05-01T10:00:00.000000Z",
            "updatedAt": "2024-05-01T10:00:00.000000Z"
        }))
        .unwrap();
        assert_eq!(book.year, Some(-500));
    }

    #[test]
    fn admin_projection_drops_the_hash() {
        let account = AdminAccount {
            id: "a1".into(),
            name: "Admin".into(),
            email: "admin@library.com".into(),
            password_hash: "$2b$12$hash".into(),
            role: "admin".into(),
            created_at: now(),
            updated_at: now(),
        };

        let stored = serde_json::to_value(&account).unwrap();
        assert_eq!(stored["password"], "$2b$12$hash");

        let public = serde_json::to_value(AdminUser::from(account)).unwrap();
        assert!(public.get("password").is_none());
        assert_eq!(public["role"], "admin");
    }
}
