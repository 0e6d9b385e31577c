//! Library server configuration

use anyhow::{anyhow, Context};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use crate::ai::{ChatRelay, CompletionProvider};
use crate::auth::AdminAuth;
use crate::books::BookCatalog;
use crate::store::DocumentStore;
use crate::upload::UploadService;
use library_blob::ObjectStore;

/// Default page size of the book listing
pub const DEFAULT_PAGE_SIZE: u32 = 12;

const MIB: usize = 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuntimeMode {
    Development,
    Production,
}

impl RuntimeMode {
    pub fn is_production(self) -> bool {
        self == RuntimeMode::Production
    }
}

impl FromStr for RuntimeMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(RuntimeMode::Development),
            "prod" | "production" => Ok(RuntimeMode::Production),
            other => Err(anyhow!(
                "APP_ENV must be `development` or `production`, got `{other}`"
            )),
        }
    }
}

/// Which origins may call the API from a browser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CorsOrigins {
    Any,
    List(Vec<String>),
}

#[derive(Clone, Debug)]
pub struct ObjectStoreConfig {
    /// Root directory of the local backend
    pub root_dir: PathBuf,
    /// Prefix of the URLs handed back to clients
    pub public_base_url: String,
}

#[derive(Clone)]
pub struct CompletionConfig {
    pub api_key: String,
    pub model: String,
}

impl std::fmt::Debug for CompletionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}

/// Configuration for the library server
#[derive(Clone, Debug)]
pub struct LibraryConfig {
    pub bind_addr: SocketAddr,
    pub mode: RuntimeMode,
    /// Document store connection string
    pub database_url: String,
    pub db_name: String,
    /// Upper bound of the document store connection pool
    pub db_max_connections: u32,
    /// `None` disables uploads with a configuration error
    pub object_store: Option<ObjectStoreConfig>,
    /// `None` disables the chat relay with a configuration error
    pub completion: Option<CompletionConfig>,
    pub cors_origins: CorsOrigins,
    /// Seed the default admin at startup when no admin exists yet
    pub allow_admin_bootstrap: bool,
    pub max_page_size: u32,
    /// Request body ceiling in bytes
    pub max_request_bytes: usize,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        let db_name = "immersive_library".to_string();
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            mode: RuntimeMode::Development,
            database_url: format!("sqlite://library_data/{db_name}.sqlite"),
            db_name,
            db_max_connections: 8,
            object_store: None,
            completion: None,
            cors_origins: CorsOrigins::Any,
            allow_admin_bootstrap: false,
            max_page_size: 1000,
            max_request_bytes: 52 * MIB,
        }
    }
}

impl LibraryConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build configuration from any variable lookup. Empty values count as unset.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(addr) = var("BIND_ADDR") {
            config.bind_addr = addr
                .parse()
                .with_context(|| format!("BIND_ADDR is not a socket address: {addr}"))?;
        }

        if let Some(mode) = var("APP_ENV") {
            config.mode = mode.parse()?;
        }

        let data_dir = var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("library_data"));

        if let Some(name) = var("DB_NAME") {
            config.db_name = name;
        }
        config.database_url = var("DATABASE_URL").unwrap_or_else(|| {
            format!(
                "sqlite://{}",
                data_dir
                    .join(format!("{}.sqlite", config.db_name))
                    .to_string_lossy()
                    .replace('\\', "/")
            )
        });

        if let Some(max) = var("DB_MAX_CONNECTIONS") {
            config.db_max_connections = parse_positive(&max, "DB_MAX_CONNECTIONS")?;
        }

        if let Some(root_dir) = var("OBJECT_STORE_DIR") {
            config.object_store = Some(ObjectStoreConfig {
                root_dir: PathBuf::from(root_dir),
                public_base_url: var("OBJECT_STORE_PUBLIC_URL")
                    .unwrap_or_else(|| "http://localhost:3001/files".to_string()),
            });
        }

        if let Some(api_key) = var("COMPLETION_API_KEY") {
            config.completion = Some(CompletionConfig {
                api_key,
                model: var("COMPLETION_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            });
        }

        if let Some(origins) = var("CORS_ORIGINS") {
            config.cors_origins = parse_origins(&origins);
        }

        if let Some(flag) = var("ALLOW_ADMIN_BOOTSTRAP") {
            config.allow_admin_bootstrap = parse_flag(&flag, "ALLOW_ADMIN_BOOTSTRAP")?;
        }

        if let Some(max) = var("MAX_PAGE_SIZE") {
            config.max_page_size = parse_positive(&max, "MAX_PAGE_SIZE")?;
        }

        if let Some(max) = var("MAX_REQUEST_BYTES") {
            config.max_request_bytes = parse_positive(&max, "MAX_REQUEST_BYTES")?;
        }

        Ok(config)
    }
}

fn parse_positive<T>(value: &str, key: &str) -> anyhow::Result<T>
where
    T: FromStr + PartialOrd + Default,
{
    match value.parse::<T>() {
        Ok(n) if n > T::default() => Ok(n),
        _ => Err(anyhow!("{key} must be a positive integer, got `{value}`")),
    }
}

fn parse_flag(value: &str, key: &str) -> anyhow::Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{key} must be true or false, got `{value}`")),
    }
}

fn parse_origins(value: &str) -> CorsOrigins {
    if value == "*" {
        return CorsOrigins::Any;
    }
    CorsOrigins::List(
        value
            .split(',')
            .map(|origin| origin.trim().trim_end_matches('/').to_string())
            .filter(|origin| !origin.is_empty())
            .collect(),
    )
}

/// App state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<LibraryConfig>,
    pub documents: DocumentStore,
    pub books: Arc<BookCatalog>,
    pub auth: Arc<AdminAuth>,
    pub uploads: Arc<UploadService>,
    pub chat: Arc<ChatRelay>,
}

impl AppState {
    pub fn new(
        config: LibraryConfig,
        documents: DocumentStore,
        object_store: Option<Arc<dyn ObjectStore>>,
        provider: Option<Arc<dyn CompletionProvider>>,
    ) -> Self {
        Self {
            books: Arc::new(BookCatalog::new(documents.clone(), config.max_page_size)),
            auth: Arc::new(AdminAuth::new(documents.clone())),
            documents,
            uploads: Arc::new(UploadService::new(object_store)),
            chat: Arc::new(ChatRelay::new(provider)),
            config: Arc::new(config),
        }
    }
}
