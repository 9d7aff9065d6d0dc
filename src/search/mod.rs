use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::{AppConfig, SearchBackend};
use crate::error::SearchError;
use crate::models::{Game, GameMetrics, SearchPage};
use crate::store::GameStore;

pub mod buckets;
pub mod opensearch_engine;
pub mod store_engine;

pub use buckets::BucketPolicy;
pub use opensearch_engine::OpenSearchEngine;
pub use store_engine::StoreSearch;

/// Search-facing capability set. One implementation is bound at startup and
/// kept for the lifetime of the process.
#[async_trait]
pub trait GameSearch: Send + Sync {
    /// Upsert a single game by id.
    async fn index(&self, game: &Game) -> Result<(), SearchError>;
    /// Upsert a batch; visible to searches once this returns.
    async fn bulk_index(&self, games: &[Game]) -> Result<(), SearchError>;
    /// Absent ids are not an error.
    async fn delete_by_id(&self, id: Uuid) -> Result<(), SearchError>;
    /// Blank `q` matches everything. Out-of-range paging is normalized.
    async fn search(&self, q: &str, page: i64, size: i64) -> Result<SearchPage, SearchError>;
    async fn metrics(&self) -> Result<GameMetrics, SearchError>;

    fn backend_name(&self) -> &'static str;
}

/// Picks the configured strategy.
pub fn connect(cfg: &AppConfig, store: &GameStore) -> Result<Arc<dyn GameSearch>, SearchError> {
    match &cfg.search_backend {
        SearchBackend::OpenSearch { url } => {
            let engine = OpenSearchEngine::new(url, &cfg.search_index, cfg.bucket_policy.clone(), cfg.io_timeout)?;
            tracing::info!(url = %url, index = %cfg.search_index, "search backend: opensearch");
            Ok(Arc::new(engine))
        }
        SearchBackend::Store => {
            tracing::info!("search backend: relational fallback");
            Ok(Arc::new(StoreSearch::new(store.clone(), cfg.bucket_policy.clone())))
        }
    }
}
