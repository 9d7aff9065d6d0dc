use std::collections::HashSet;

use anyhow::{Context, Result};
use fake::faker::company::en::Buzzword;
use fake::faker::lorem::en::Sentence;
use fake::Fake;
use rand::{seq::SliceRandom, Rng};
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

use gamecatalog::catalog::GameInput;
use gamecatalog::config::AppConfig;
use gamecatalog::db;
use gamecatalog::error::CatalogError;
use gamecatalog::models::normalize_title;

const GENRES: [&str; 8] = [
    "Roguelike", "Platformer", "Tactics", "Racing", "Survival", "Puzzle", "RPG", "Shooter",
];

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = AppConfig::from_env().context("invalid configuration")?;
    let target: usize = std::env::var("SEED_COUNT")
        .ok()
        .map(|v| v.parse())
        .transpose()
        .context("SEED_COUNT must be a number")?
        .unwrap_or(50);

    let state = db::init_state(&cfg).await?;
    let catalog = &state.catalog;

    let mut rng = rand::thread_rng();
    let mut titles = HashSet::<String>::new();
    let mut created = 0usize;
    let mut attempts = 0usize;

    while created < target && attempts < target * 10 {
        attempts += 1;

        // "<Buzzword> <Genre>", e.g. "Synergistic Roguelike"
        let buzz: String = Buzzword().fake();
        let genre = GENRES.choose(&mut rng).copied().unwrap_or("Arcade");
        let title = format!("{} {genre}", capitalize(&buzz));
        if !titles.insert(normalize_title(&title)) {
            continue; // avoid exact duplicates
        }

        let description: String = Sentence(6..14).fake();
        let input = GameInput {
            title,
            description,
            price: Decimal::new(rng.gen_range(0..30_000), 2),
        };

        match catalog.create(input).await {
            Ok(_) => created += 1,
            // already there from a previous run
            Err(CatalogError::Conflict(_)) => {}
            Err(e) => return Err(e).context("seeding failed"),
        }
    }

    let res = catalog.reindex_all().await.context("reindex after seeding failed")?;
    println!("Seeded games: {created} (indexed {})", res.indexed);

    Ok(())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
