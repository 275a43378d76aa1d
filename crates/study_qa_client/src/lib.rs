//! Shared study Q&A client library (config, answer cache, Gemini client, query service).
//! Used by the `study-qa` CLI and the interactive chat shell.

pub mod cache;
pub mod client;
pub mod config;
pub mod messages;
pub mod service;

pub use cache::{CacheEntry, CacheStats, CacheStore, StoreError};
pub use client::{Answerer, GeminiClient, GenerateError, ServiceStatus};
pub use config::{default_config_path, ApiSection, CacheSection, Config, ConfigError};
pub use service::{Answer, QueryError, QueryService, Source, MAX_QUESTION_CHARS};

/// Build a [`QueryService`] from config: live Gemini client plus the on-disk cache when enabled.
///
/// Fails before any query can run when the API key is missing.
pub fn service_from_config(cfg: &Config) -> Result<QueryService, SetupError> {
    let answerer = GeminiClient::from_config(cfg)?;
    let store = open_cache(cfg)?;
    Ok(QueryService::new(store, Box::new(answerer)))
}

/// Open the configured cache, or `None` when caching is disabled.
pub fn open_cache(cfg: &Config) -> Result<Option<CacheStore>, SetupError> {
    if !cfg.cache_enabled() {
        tracing::info!("Answer cache disabled by config");
        return Ok(None);
    }
    let path = cfg.cache_path()?;
    Ok(Some(CacheStore::open(&path)?))
}

/// Startup failure: bad config or an unusable cache database.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StoreError),
}
