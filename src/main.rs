use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

use gamecatalog::config::AppConfig;
use gamecatalog::{db, server};

#[rocket::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 1) configuration is read once
    let cfg = AppConfig::from_env().context("invalid configuration")?;

    // 2) store, search strategy and catalog
    let state = db::init_state(&cfg).await?;
    tracing::info!(backend = state.catalog.search_backend(), "catalog ready");

    // 3) HTTP
    let app = server::build(state).context("invalid CORS policy")?;
    app.launch().await.map_err(|e| anyhow!("server stopped: {e}"))?;
    Ok(())
}
