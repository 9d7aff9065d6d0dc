use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::Row;
use uuid::Uuid;

use crate::error::SearchError;
use crate::models::{Game, GameMetrics, Paging, SearchPage, MAX_PAGE_SIZE};
use crate::store::{GameRow, GameStore, GAME_COLUMNS};

use super::buckets::{normalize_metrics, BucketPolicy, RawMetrics};
use super::GameSearch;

/// Fallback used when no search engine is configured: substring matching
/// and aggregation straight against the relational store. Writes are no-ops
/// since the store already holds everything.
pub struct StoreSearch {
    store: GameStore,
    policy: BucketPolicy,
}

impl StoreSearch {
    pub fn new(store: GameStore, policy: BucketPolicy) -> Self {
        Self { store, policy }
    }
}

/// Lowercased like the stored `*_lc` columns. `%`, `_` and the escape char
/// itself are matched literally.
fn like_pattern(q: &str) -> String {
    let mut out = String::with_capacity(q.len() + 2);
    out.push('%');
    for c in q.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

// `*_lc` columns are folded in Rust on write; SQLite's `lower` only folds ASCII.
const MATCH_CLAUSE: &str = "title_lc LIKE ? ESCAPE '\\' OR description_lc LIKE ? ESCAPE '\\'";

/// One statement for the stats and every bucket, so they describe the same
/// snapshot. Binds `(from, to)` cents pairs in `ranges` order.
fn metrics_sql(buckets: usize) -> String {
    let mut sql = String::from("SELECT COUNT(*), SUM(price_cents), MIN(price_cents), MAX(price_cents)");
    for _ in 0..buckets {
        sql.push_str(", COALESCE(SUM(CASE WHEN price_cents >= ? AND price_cents < ? THEN 1 ELSE 0 END), 0)");
    }
    sql.push_str(" FROM games");
    sql
}

/// Smallest whole cent amount at or above `bound`.
fn cents_ceil(bound: Decimal) -> i64 {
    (bound * Decimal::ONE_HUNDRED).ceil().to_i64().unwrap_or(i64::MAX)
}

#[async_trait]
impl GameSearch for StoreSearch {
    async fn index(&self, _: &Game) -> Result<(), SearchError> {
        Ok(())
    }

    async fn bulk_index(&self, _: &[Game]) -> Result<(), SearchError> {
        Ok(())
    }

    async fn delete_by_id(&self, _: Uuid) -> Result<(), SearchError> {
        Ok(())
    }

    async fn search(&self, q: &str, page: i64, size: i64) -> Result<SearchPage, SearchError> {
        let paging = Paging::normalize(page, size, MAX_PAGE_SIZE);
        let q = q.trim();
        let pool = self.store.pool();

        let (total, rows): (i64, Vec<GameRow>) = if q.is_empty() {
            let total = sqlx::query_scalar("SELECT COUNT(*) FROM games").fetch_one(pool).await?;
            let sql = format!("SELECT {GAME_COLUMNS} FROM games ORDER BY title ASC, id ASC LIMIT ? OFFSET ?");
            let rows = sqlx::query_as(&sql)
                .bind(paging.size as i64)
                .bind(paging.offset())
                .fetch_all(pool)
                .await?;
            (total, rows)
        } else {
            let pattern = like_pattern(q);
            let total = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM games WHERE {MATCH_CLAUSE}"))
                .bind(&pattern)
                .bind(&pattern)
                .fetch_one(pool)
                .await?;
            let sql = format!(
                "SELECT {GAME_COLUMNS} FROM games WHERE {MATCH_CLAUSE} ORDER BY title ASC, id ASC LIMIT ? OFFSET ?"
            );
            let rows = sqlx::query_as(&sql)
                .bind(&pattern)
                .bind(&pattern)
                .bind(paging.size as i64)
                .bind(paging.offset())
                .fetch_all(pool)
                .await?;
            (total, rows)
        };

        tracing::debug!(q, total, page = paging.page, size = paging.size, "store search");
        let items = rows
            .into_iter()
            .map(GameRow::into_game)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SearchPage {
            items,
            total: total.max(0) as u64,
        })
    }

    async fn metrics(&self) -> Result<GameMetrics, SearchError> {
        let ranges = self.policy.ranges();
        let sql = metrics_sql(ranges.len());
        let mut query = sqlx::query(&sql);
        for (from, to) in &ranges {
            query = query.bind(cents_ceil(*from)).bind(to.map_or(i64::MAX, cents_ceil));
        }
        let row = query.fetch_one(self.store.pool()).await?;

        let count: i64 = row.try_get(0)?;
        let sum: Option<i64> = row.try_get(1)?;
        let cents = |v: i64| Decimal::new(v, 2);
        let mut buckets = Vec::with_capacity(ranges.len());
        for (i, (from, _)) in ranges.iter().enumerate() {
            let n: i64 = row.try_get(4 + i)?;
            buckets.push((*from, n.max(0) as u64));
        }

        let raw = RawMetrics {
            count: count.max(0) as u64,
            avg: match sum {
                Some(s) if count > 0 => Some(cents(s) / Decimal::from(count)),
                _ => None,
            },
            min: row.try_get::<Option<i64>, _>(2)?.map(cents),
            max: row.try_get::<Option<i64>, _>(3)?.map(cents),
            buckets,
        };
        Ok(normalize_metrics(&self.policy, raw))
    }

    fn backend_name(&self) -> &'static str {
        "store"
    }
}
