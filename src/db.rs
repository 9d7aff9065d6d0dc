use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::catalog::CatalogService;
use crate::config::AppConfig;
use crate::search::{self, GameSearch};
use crate::store::GameStore;

pub struct AppState {
    pub catalog: CatalogService,
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS games (
        id TEXT PRIMARY KEY NOT NULL,
        title TEXT NOT NULL,
        title_key TEXT NOT NULL,
        description TEXT NOT NULL,
        title_lc TEXT NOT NULL,
        description_lc TEXT NOT NULL,
        price_cents INTEGER NOT NULL CHECK (price_cents >= 0)
    )",
    // uniqueness of normalized titles
    "CREATE UNIQUE INDEX IF NOT EXISTS ux_games_title_key ON games (title_key)",
    // listing and fallback search order
    "CREATE INDEX IF NOT EXISTS ix_games_title ON games (title)",
    "CREATE TABLE IF NOT EXISTS game_events (
        id TEXT PRIMARY KEY NOT NULL,
        game_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        data TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS ix_game_events_game ON game_events (game_id, created_at)",
];

/// Idempotent; safe to run on every start.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for stmt in SCHEMA {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}

pub async fn connect(cfg: &AppConfig) -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(cfg.db_max_connections)
        .acquire_timeout(cfg.io_timeout)
        .connect(&cfg.database_url)
        .await
        .with_context(|| format!("cannot open database {}", cfg.database_url))?;
    ensure_schema(&pool).await.context("schema bootstrap failed")?;
    Ok(pool)
}

/// Wires store, search strategy and catalog from configuration.
pub async fn init_state(cfg: &AppConfig) -> Result<AppState> {
    let pool = connect(cfg).await?;
    let store = GameStore::new(pool);
    let search: Arc<dyn GameSearch> = search::connect(cfg, &store)?;
    Ok(AppState {
        catalog: CatalogService::new(store, search, cfg.reindex_page_size),
    })
}

/// Single-connection in-memory database; every connection to
/// `sqlite::memory:` is a separate database, so the pool must never recycle.
#[cfg(test)]
pub(crate) async fn connect_memory() -> Result<SqlitePool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    ensure_schema(&pool).await?;
    Ok(pool)
}
