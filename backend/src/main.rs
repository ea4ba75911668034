use std::env;
use std::error::Error;
use std::sync::Arc;

use spugna_backend::config::{load_roster, Config};
use spugna_backend::store::{JsonFileStore, MemoryStore, StateStore};
use spugna_backend::{app, AppState, DrawService};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_env("SPUGNA_LOG")
        .unwrap_or_else(|_| EnvFilter::new("spugna_backend=info,draw_core=info,warn"));
    let format = env::var("SPUGNA_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());
    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => registry.with(fmt::layer().json().with_ansi(false)).init(),
        _ => registry.with(fmt::layer().compact()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    let config = Config::from_env()?;
    let roster = load_roster(&config.roster_path).await?;
    let store: Arc<dyn StateStore> = match &config.persist_path {
        Some(path) => Arc::new(JsonFileStore::new(path)),
        None => Arc::new(MemoryStore::default()),
    };
    info!(
        participants = roster.len(),
        gifts_per_giver = config.draw.gifts_per_giver,
        persist = ?config.persist_path,
        "draw service ready"
    );

    let app = app(AppState::new(DrawService::new(roster, config.draw, store)));
    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!(bind = %config.bind, "starting server");
    axum::serve(listener, app).await?;
    Ok(())
}
