//! Catalog use cases.
//!
//! Writes go to the relational store first; that step is authoritative and
//! its failure fails the request. The search projection is updated
//! afterwards as a best-effort step whose failure is logged and dropped, so
//! the catalog stays writable while the search backend is down. `reindex_all`
//! is the repair path for any drift this leaves behind.

use std::future::Future;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{is_unique_violation, CatalogError, SearchError};
use crate::models::{
    normalize_title, Description, Game, GameEvent, GameMetrics, GameTitle, Paging, Price, PriceBucket,
    MAX_PAGE_SIZE,
};
use crate::search::GameSearch;
use crate::store::GameStore;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GameInput {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameView {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
}

impl From<&Game> for GameView {
    fn from(g: &Game) -> Self {
        Self {
            id: g.id(),
            title: g.title().to_string(),
            description: g.description().to_string(),
            price: g.price().value(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameList {
    pub page: u32,
    pub size: u32,
    pub count: usize,
    pub items: Vec<GameView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResults {
    pub total: u64,
    pub page: u32,
    pub size: u32,
    pub items: Vec<GameView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramBucket {
    #[serde(with = "rust_decimal::serde::float")]
    pub from: Decimal,
    /// `null` for the open-ended top bucket.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub to: Option<Decimal>,
    pub doc_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsView {
    pub count: u64,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub avg_price: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub min_price: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub max_price: Option<Decimal>,
    pub histogram: Vec<HistogramBucket>,
}

impl From<GameMetrics> for MetricsView {
    fn from(m: GameMetrics) -> Self {
        Self {
            count: m.count,
            avg_price: m.avg_price,
            min_price: m.min_price,
            max_price: m.max_price,
            histogram: m
                .buckets
                .into_iter()
                .map(|PriceBucket { from, to, doc_count }| HistogramBucket { from, to, doc_count })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexResult {
    pub indexed: u64,
}

pub struct CatalogService {
    store: GameStore,
    search: Arc<dyn GameSearch>,
    reindex_page_size: u32,
}

impl CatalogService {
    pub fn new(store: GameStore, search: Arc<dyn GameSearch>, reindex_page_size: u32) -> Self {
        Self {
            store,
            search,
            reindex_page_size: reindex_page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn search_backend(&self) -> &'static str {
        self.search.backend_name()
    }

    pub async fn create(&self, input: GameInput) -> Result<GameView, CatalogError> {
        let key = normalize_title(&input.title);
        if !key.is_empty() && self.store.exists_by_title(&key).await? {
            return Err(CatalogError::Conflict(input.title.trim().to_string()));
        }

        let game = Game::from_input(&input.title, &input.description, input.price)?;
        self.store.add(&game).await.map_err(|e| conflict_or_store(e, &game))?;
        tracing::info!(game_id = %game.id(), title = %game.title(), "game created");

        self.best_effort("index", game.id(), self.search.index(&game)).await;
        Ok(GameView::from(&game))
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<GameView>, CatalogError> {
        Ok(self.store.get_by_id(id).await?.as_ref().map(GameView::from))
    }

    pub async fn list(&self, page: i64, size: i64) -> Result<GameList, CatalogError> {
        let paging = Paging::normalize(page, size, MAX_PAGE_SIZE);
        let games = self.store.list(paging.page as i64, paging.size as i64).await?;
        let items: Vec<GameView> = games.iter().map(GameView::from).collect();
        Ok(GameList {
            page: paging.page,
            size: paging.size,
            count: items.len(),
            items,
        })
    }

    /// `Ok(None)` when the id is unknown.
    pub async fn update(&self, id: Uuid, input: GameInput) -> Result<Option<GameView>, CatalogError> {
        let Some(mut game) = self.store.get_by_id(id).await? else {
            return Ok(None);
        };

        game.update(
            GameTitle::create(&input.title)?,
            Description::create(&input.description)?,
            Price::parse(input.price)?,
        );
        let updated = self.store.update(&game).await.map_err(|e| conflict_or_store(e, &game))?;
        if !updated {
            // deleted between load and write
            return Ok(None);
        }
        tracing::info!(game_id = %id, "game updated");

        self.best_effort("index", id, self.search.index(&game)).await;
        Ok(Some(GameView::from(&game)))
    }

    /// `false` when the id is unknown.
    pub async fn delete(&self, id: Uuid) -> Result<bool, CatalogError> {
        if self.store.get_by_id(id).await?.is_none() {
            return Ok(false);
        }
        if !self.store.delete(id).await? {
            return Ok(false);
        }
        tracing::info!(game_id = %id, "game deleted");

        self.best_effort("delete", id, self.search.delete_by_id(id)).await;
        Ok(true)
    }

    pub async fn search(&self, q: &str, page: i64, size: i64) -> Result<SearchResults, CatalogError> {
        let paging = Paging::normalize(page, size, MAX_PAGE_SIZE);
        let found = self.search.search(q, paging.page as i64, paging.size as i64).await?;
        Ok(SearchResults {
            total: found.total,
            page: paging.page,
            size: paging.size,
            items: found.items.iter().map(GameView::from).collect(),
        })
    }

    pub async fn metrics(&self) -> Result<MetricsView, CatalogError> {
        Ok(self.search.metrics().await?.into())
    }

    /// Republishes the whole store to the search backend, page by page.
    /// A failing page aborts the run; earlier pages stay indexed.
    pub async fn reindex_all(&self) -> Result<ReindexResult, CatalogError> {
        let size = self.reindex_page_size as i64;
        let mut page = 1;
        let mut indexed = 0u64;
        loop {
            let batch = self.store.list(page, size).await?;
            if batch.is_empty() {
                break;
            }
            if let Err(err) = self.search.bulk_index(&batch).await {
                tracing::error!(page, indexed, error = %err, "reindex aborted");
                return Err(err.into());
            }
            indexed += batch.len() as u64;
            page += 1;
        }
        tracing::info!(indexed, backend = self.search.backend_name(), "reindex finished");
        Ok(ReindexResult { indexed })
    }

    pub async fn events(&self, id: Uuid) -> Result<Vec<GameEvent>, CatalogError> {
        Ok(self.store.events(id).await?)
    }

    /// Runs the search-side step of a write. Failures are logged, never returned.
    async fn best_effort(&self, op: &'static str, id: Uuid, step: impl Future<Output = Result<(), SearchError>>) {
        if let Err(err) = step.await {
            tracing::warn!(game_id = %id, op, error = %err, "search index write failed, store remains authoritative");
        }
    }
}

fn conflict_or_store(err: sqlx::Error, game: &Game) -> CatalogError {
    if is_unique_violation(&err) {
        CatalogError::Conflict(game.title().to_string())
    } else {
        CatalogError::Store(err)
    }
}
