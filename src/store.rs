//! Relational system of record for games.

use chrono::Utc;
use futures_util::TryStreamExt;
use serde_json::json;
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::{
    Description, Game, GameEvent, GameEventKind, GameTitle, Paging, Price, MAX_PAGE_SIZE,
};

#[derive(Debug, FromRow)]
pub(crate) struct GameRow {
    pub id: String,
    pub title: String,
    pub description: String,
    pub price_cents: i64,
}

impl GameRow {
    pub(crate) fn into_game(self) -> Result<Game, sqlx::Error> {
        let id = Uuid::parse_str(&self.id).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let title = GameTitle::create(&self.title).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let description =
            Description::create(&self.description).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let price = Price::from_cents(self.price_cents).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        Ok(Game::restore(id, title, description, price))
    }
}

#[derive(Debug, FromRow)]
struct EventRow {
    id: String,
    game_id: String,
    kind: String,
    data: Option<String>,
    created_at: chrono::DateTime<Utc>,
}

impl EventRow {
    fn into_event(self) -> Result<GameEvent, sqlx::Error> {
        let decode = |e: Box<dyn std::error::Error + Send + Sync>| sqlx::Error::Decode(e);
        Ok(GameEvent {
            id: Uuid::parse_str(&self.id).map_err(|e| decode(Box::new(e)))?,
            game_id: Uuid::parse_str(&self.game_id).map_err(|e| decode(Box::new(e)))?,
            kind: self.kind.parse().map_err(|e: String| decode(e.into()))?,
            data: self
                .data
                .map(|d| serde_json::from_str(&d))
                .transpose()
                .map_err(|e| decode(Box::new(e)))?,
            created_at: self.created_at,
        })
    }
}

pub(crate) const GAME_COLUMNS: &str = "id, title, description, price_cents";

/// Handle over the `games` and `game_events` tables. Cheap to clone.
#[derive(Clone)]
pub struct GameStore {
    pool: SqlitePool,
}

impl GameStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn add(&self, game: &Game) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO games (id, title, title_key, description, title_lc, description_lc, price_cents) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(game.id().to_string())
        .bind(game.title().as_str())
        .bind(game.title().key())
        .bind(game.description().as_str())
        .bind(game.title().as_str().to_lowercase())
        .bind(game.description().as_str().to_lowercase())
        .bind(game.price().cents())
        .execute(&mut *tx)
        .await?;
        append_event(&mut tx, game.id(), GameEventKind::Created, Some(snapshot(game))).await?;
        tx.commit().await
    }

    /// Full replacement of the mutable attributes. `false` when the id is unknown.
    pub async fn update(&self, game: &Game) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let res = sqlx::query(
            "UPDATE games SET title = ?, title_key = ?, description = ?, title_lc = ?, description_lc = ?, \
             price_cents = ? WHERE id = ?",
        )
        .bind(game.title().as_str())
        .bind(game.title().key())
        .bind(game.description().as_str())
        .bind(game.title().as_str().to_lowercase())
        .bind(game.description().as_str().to_lowercase())
        .bind(game.price().cents())
        .bind(game.id().to_string())
        .execute(&mut *tx)
        .await?;
        if res.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        append_event(&mut tx, game.id(), GameEventKind::Updated, Some(snapshot(game))).await?;
        tx.commit().await?;
        Ok(true)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<Game>, sqlx::Error> {
        let row: Option<GameRow> =
            sqlx::query_as(&format!("SELECT {GAME_COLUMNS} FROM games WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(GameRow::into_game).transpose()
    }

    /// `false` when nothing was deleted.
    pub async fn delete(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let res = sqlx::query("DELETE FROM games WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        if res.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        append_event(&mut tx, id, GameEventKind::Deleted, None).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Ordered by title. Paging is normalized with the listing cap.
    pub async fn list(&self, page: i64, size: i64) -> Result<Vec<Game>, sqlx::Error> {
        let paging = Paging::normalize(page, size, MAX_PAGE_SIZE);
        let sql = format!("SELECT {GAME_COLUMNS} FROM games ORDER BY title ASC, id ASC LIMIT ? OFFSET ?");
        let mut rows = sqlx::query_as::<_, GameRow>(&sql)
            .bind(paging.size as i64)
            .bind(paging.offset())
            .fetch(&self.pool);

        let mut games = Vec::with_capacity(paging.size as usize);
        while let Some(row) = rows.try_next().await? {
            games.push(row.into_game()?);
        }
        Ok(games)
    }

    pub async fn count(&self) -> Result<u64, sqlx::Error> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM games")
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as u64)
    }

    /// `title_key` must already be normalized (see [`crate::models::normalize_title`]).
    pub async fn exists_by_title(&self, title_key: &str) -> Result<bool, sqlx::Error> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM games WHERE title_key = ? LIMIT 1")
            .bind(title_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// Oldest first.
    pub async fn events(&self, game_id: Uuid) -> Result<Vec<GameEvent>, sqlx::Error> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT id, game_id, kind, data, created_at FROM game_events WHERE game_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(game_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(EventRow::into_event).collect()
    }
}

fn snapshot(game: &Game) -> serde_json::Value {
    json!({
        "title": game.title().as_str(),
        "description": game.description().as_str(),
        "price": game.price().to_string(),
    })
}

async fn append_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    game_id: Uuid,
    kind: GameEventKind,
    data: Option<serde_json::Value>,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO game_events (id, game_id, kind, data, created_at) VALUES (?, ?, ?, ?, ?)")
        .bind(Uuid::new_v4().to_string())
        .bind(game_id.to_string())
        .bind(kind.as_str())
        .bind(data.map(|d| d.to_string()))
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?;
    Ok(())
}
