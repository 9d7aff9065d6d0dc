use rocket::http::Method;
use rocket::serde::json::Json;
use rocket::{Build, Rocket, State};
use rocket_cors::{AllowedHeaders, AllowedOrigins, CorsOptions};
use serde_json::{json, Value};

use crate::db::AppState;
use crate::routes::games;

#[get("/")]
fn index(state: &State<AppState>) -> Json<Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "search_backend": state.catalog.search_backend(),
    }))
}

#[get("/health")]
fn health() -> &'static str {
    "ok"
}

// Open CORS for development.
pub fn cors() -> Result<rocket_cors::Cors, rocket_cors::Error> {
    CorsOptions {
        allowed_origins: AllowedOrigins::all(),
        allowed_methods: vec![Method::Get, Method::Post, Method::Put, Method::Delete, Method::Options]
            .into_iter()
            .map(From::from)
            .collect(),
        allowed_headers: AllowedHeaders::some(&["Content-Type", "Accept", "Authorization"]),
        allow_credentials: true,
        ..Default::default()
    }
    .to_cors()
}

pub fn build(state: AppState) -> Result<Rocket<Build>, rocket_cors::Error> {
    Ok(rocket::build()
        .manage(state)
        .attach(cors()?)
        .mount("/", routes![index, health])
        .mount("/api/games", games::routes())
        .register(
            "/",
            catchers![games::not_found, games::bad_request, games::unprocessable, games::internal_error],
        ))
}
