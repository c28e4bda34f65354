use deadpool_postgres::Pool;
use std::sync::Arc;

use crate::config::Config;
use crate::crypto::vault::KeyVault;
use crate::error::Result;
use crate::services::cache::CacheStore;
use crate::services::keys::KeySelector;
use crate::services::provider::ModelProvider;
use crate::services::quota::{QuotaPolicy, QuotaTracker};
use crate::services::search::SearchClient;

/// The application's state. Every component is constructed once here and
/// handed to the handlers by reference; there are no process-level
/// singletons.
#[derive(Clone)]
pub struct AppState {
    /// The database connection pool.
    pub db: Pool,
    /// The TTL cache store (Redis, or in-memory fallback).
    pub cache: CacheStore,
    /// The application's configuration.
    pub config: Config,
    /// The credential vault.
    pub vault: Arc<KeyVault>,
    /// Per-identity message admission.
    pub quota: QuotaTracker,
    /// Provider credential selection and rotation.
    pub keys: KeySelector,
    /// The model provider client.
    pub provider: ModelProvider,
    /// The web search client.
    pub search: SearchClient,
}

impl AppState {
    /// Creates a new `AppState`.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let db = crate::db::create_pool(&config.database_url)?;
        tracing::info!("✅ PostgreSQL pool initialized with deadpool-postgres");

        let cache = CacheStore::connect(&config.redis_url).await;

        let vault = Arc::new(KeyVault::new(&config.session_secret)?);
        tracing::info!("✅ Credential vault key derived");

        let policy = if config.quota_fail_open {
            QuotaPolicy::FailOpen
        } else {
            QuotaPolicy::FailClosed
        };
        let quota = QuotaTracker::new(db.clone(), cache.clone(), policy);
        tracing::info!("✅ Quota tracker initialized ({:?})", policy);

        let http = reqwest::Client::new();

        let keys = KeySelector::new(
            db.clone(),
            vault.clone(),
            http.clone(),
            config.openrouter_base_url.clone(),
        );

        let provider = ModelProvider::new(
            http.clone(),
            config.openrouter_base_url.clone(),
            config.google_ai_base_url.clone(),
        );

        let search = SearchClient::new(http, config.duckduckgo_base_url.clone());

        Ok(AppState {
            db,
            cache,
            config: config.clone(),
            vault,
            quota,
            keys,
            provider,
            search,
        })
    }
}
