use rocket::http::Status;
use rocket::response::{self, status, Responder};
use rocket::serde::json::{self, Json};
use rocket::{Request, Route, State};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::catalog::{GameInput, GameList, GameView, MetricsView, ReindexResult, SearchResults};
use crate::db::AppState;
use crate::error::{CatalogError, SearchError, ValidationError};
use crate::models::GameEvent;

impl<'r> Responder<'r, 'static> for CatalogError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let status = match &self {
            CatalogError::Validation(_) => Status::BadRequest,
            CatalogError::Conflict(_) => Status::Conflict,
            CatalogError::Search(SearchError::Store(_)) | CatalogError::Store(_) => Status::InternalServerError,
            CatalogError::Search(_) => Status::BadGateway,
        };
        if status.code >= 500 {
            tracing::error!(uri = %req.uri(), error = %self, "request failed");
        }
        let body = json!({ "error": self.kind(), "message": self.to_string() });
        (status, Json(body)).respond_to(req)
    }
}

type ApiResult<T> = Result<T, CatalogError>;

/// Unparseable JSON or a missing/ill-typed field is a validation failure,
/// whatever the request's content type.
fn game_input(body: Result<Json<GameInput>, json::Error<'_>>) -> ApiResult<GameInput> {
    body.map(Json::into_inner)
        .map_err(|e| CatalogError::Validation(ValidationError::Body(e.to_string())))
}

// malformed ids are indistinguishable from unknown ones
fn parse_id(id: &str) -> Option<Uuid> {
    Uuid::parse_str(id).ok()
}

#[get("/?<page>&<size>")]
async fn list(page: Option<i64>, size: Option<i64>, state: &State<AppState>) -> ApiResult<Json<GameList>> {
    let games = state.catalog.list(page.unwrap_or(1), size.unwrap_or(0)).await?;
    Ok(Json(games))
}

#[get("/search?<q>&<page>&<size>")]
async fn search(
    q: Option<String>,
    page: Option<i64>,
    size: Option<i64>,
    state: &State<AppState>,
) -> ApiResult<Json<SearchResults>> {
    let q = q.unwrap_or_default();
    let found = state.catalog.search(&q, page.unwrap_or(1), size.unwrap_or(0)).await?;
    Ok(Json(found))
}

#[get("/metrics")]
async fn metrics(state: &State<AppState>) -> ApiResult<Json<MetricsView>> {
    Ok(Json(state.catalog.metrics().await?))
}

#[post("/reindex")]
async fn reindex(state: &State<AppState>) -> ApiResult<Json<ReindexResult>> {
    Ok(Json(state.catalog.reindex_all().await?))
}

#[get("/<id>")]
async fn read(id: &str, state: &State<AppState>) -> ApiResult<Option<Json<GameView>>> {
    let Some(id) = parse_id(id) else { return Ok(None) };
    Ok(state.catalog.get(id).await?.map(Json))
}

#[post("/", data = "<body>")]
async fn create(
    body: Result<Json<GameInput>, json::Error<'_>>,
    state: &State<AppState>,
) -> ApiResult<status::Created<Json<GameView>>> {
    let game = state.catalog.create(game_input(body)?).await?;
    let location = format!("/api/games/{}", game.id);
    Ok(status::Created::new(location).body(Json(game)))
}

#[put("/<id>", data = "<body>")]
async fn update(
    id: &str,
    body: Result<Json<GameInput>, json::Error<'_>>,
    state: &State<AppState>,
) -> ApiResult<Option<Json<GameView>>> {
    let Some(id) = parse_id(id) else { return Ok(None) };
    Ok(state.catalog.update(id, game_input(body)?).await?.map(Json))
}

#[delete("/<id>")]
async fn delete(id: &str, state: &State<AppState>) -> ApiResult<Status> {
    let Some(id) = parse_id(id) else { return Ok(Status::NotFound) };
    Ok(if state.catalog.delete(id).await? {
        Status::NoContent
    } else {
        Status::NotFound
    })
}

#[get("/<id>/events")]
async fn events(id: &str, state: &State<AppState>) -> ApiResult<Option<Json<Vec<GameEvent>>>> {
    let Some(id) = parse_id(id) else { return Ok(None) };
    Ok(Some(Json(state.catalog.events(id).await?)))
}

pub fn routes() -> Vec<Route> {
    routes![list, search, metrics, reindex, read, create, update, delete, events]
}

#[catch(404)]
pub fn not_found(req: &Request) -> Json<Value> {
    Json(json!({ "error": "not_found", "message": format!("nothing at {}", req.uri()) }))
}

#[catch(400)]
pub fn bad_request() -> Json<Value> {
    Json(json!({ "error": "validation", "message": "malformed request" }))
}

#[catch(422)]
pub fn unprocessable() -> Json<Value> {
    Json(json!({ "error": "validation", "message": "request body does not match the expected shape" }))
}

#[catch(500)]
pub fn internal_error() -> Json<Value> {
    Json(json!({ "error": "internal", "message": "internal server error" }))
}
