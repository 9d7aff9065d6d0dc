use std::env;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

use crate::models::MAX_PAGE_SIZE;
use crate::search::BucketPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchBackend {
    OpenSearch { url: String },
    /// Substring search and aggregation against the relational store.
    Store,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub search_backend: SearchBackend,
    pub search_index: String,
    pub bucket_policy: BucketPolicy,
    pub io_timeout: Duration,
    pub reindex_page_size: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // .env is optional
        Self::from_lookup(|k| env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |k: &str, d: &str| lookup(k).filter(|v| !v.trim().is_empty()).unwrap_or_else(|| d.to_string());
        let number = |k: &str, d: u64| -> Result<u64> {
            get(k, &d.to_string())
                .trim()
                .parse::<u64>()
                .with_context(|| format!("{k} must be a non-negative integer"))
        };

        let search_url = lookup("SEARCH_URL").filter(|v| !v.trim().is_empty());
        let default_backend = if search_url.is_some() { "opensearch" } else { "store" };
        let search_backend = match get("SEARCH_BACKEND", default_backend).trim().to_lowercase().as_str() {
            "opensearch" => SearchBackend::OpenSearch {
                url: search_url.ok_or_else(|| anyhow!("SEARCH_BACKEND=opensearch requires SEARCH_URL"))?,
            },
            "store" | "sql" => SearchBackend::Store,
            other => bail!("unknown SEARCH_BACKEND '{other}' (expected 'opensearch' or 'store')"),
        };

        let bucket_policy: BucketPolicy = get("PRICE_BUCKETS", "50,100,200").parse()?;

        let reindex_page_size = match number("REINDEX_PAGE_SIZE", MAX_PAGE_SIZE as u64)? {
            0 => MAX_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE as u64) as u32,
        };

        Ok(Self {
            database_url: get("DATABASE_URL", "sqlite://games.db?mode=rwc"),
            db_max_connections: number("DB_MAX_CONNECTIONS", 5)?.max(1) as u32,
            search_backend,
            search_index: get("SEARCH_INDEX", "games").trim().to_string(),
            bucket_policy,
            io_timeout: Duration::from_secs(number("IO_TIMEOUT_SECS", 10)?.max(1)),
            reindex_page_size,
        })
    }
}
