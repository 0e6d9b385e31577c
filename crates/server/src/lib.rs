//! Immersive Library Server
//!
//! JSON API for a media library: book catalog, admin login, media uploads
//! and a streaming reading-assistant chat.

pub mod ai;
pub mod auth;
pub mod books;
pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod router;
pub mod store;
pub mod upload;

use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ai::{CompletionProvider, GenAiProvider};
use auth::AdminAuth;
use library_blob::{BlobStore, ObjectStore};
use store::DocumentStore;

pub use config::{AppState, LibraryConfig};
pub use error::{Error, Result};

pub const DEFAULT_LOG_FILTER: &str = "library_server=info,library_blob=info,tower_http=info";

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_err()
    {
        // Already set, ignore
    }
}

/// Open the object store when one is configured.
pub async fn open_object_store(
    config: &LibraryConfig,
) -> anyhow::Result<Option<Arc<dyn ObjectStore>>> {
    let Some(store_config) = &config.object_store else {
        warn!("Object store not configured; uploads disabled (set OBJECT_STORE_DIR)");
        return Ok(None);
    };

    let store = BlobStore::new(&store_config.root_dir, store_config.public_base_url.clone())
        .await
        .with_context(|| format!("opening object store at {:?}", store_config.root_dir))?;
    info!(
        "Object store at {:?}, served from {}",
        store_config.root_dir, store_config.public_base_url
    );

    Ok(Some(Arc::new(store)))
}

pub fn completion_provider(config: &LibraryConfig) -> Option<Arc<dyn CompletionProvider>> {
    match &config.completion {
        Some(completion) => Some(Arc::new(GenAiProvider::new(completion))),
        None => {
            warn!("Completion provider not configured; chat disabled (set COMPLETION_API_KEY)");
            None
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    let config = LibraryConfig::from_env()?;

    info!("=== Immersive Library Server ===");
    info!("Mode: {:?}", config.mode);

    let documents = DocumentStore::connect(&config.database_url, config.db_max_connections)
        .await
        .with_context(|| format!("connecting to {}", config.database_url))?;

    if config.allow_admin_bootstrap {
        AdminAuth::new(documents.clone()).seed_default_admin().await?;
    } else {
        info!("Admin bootstrap disabled");
    }

    let object_store = open_object_store(&config).await?;
    let provider = completion_provider(&config);

    let bind_addr = config.bind_addr;
    let state = AppState::new(config, documents.clone(), object_store, provider);
    info!(
        "Uploads {}, chat {}",
        if state.uploads.is_configured() { "enabled" } else { "disabled" },
        if state.chat.is_configured() { "enabled" } else { "disabled" }
    );
    let app = router::router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    info!("Library server listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    documents.close().await;
    info!("Library server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
