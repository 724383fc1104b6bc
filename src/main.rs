//! Furniture store backend

use anyhow::Result;
use std::{sync::Arc, time::Duration};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use furniture_store::{
    api::{self, AppState},
    config::Config,
    events::EventPublisher,
    media::MediaStorage,
    session::SessionStore,
    store::{MemoryStore, PgStore, Store},
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();

    let config = Config::from_env()?;
    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url, config.database_max_connections).await?;
            store.migrate().await?;
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };
    let events = EventPublisher::connect(config.nats_url.as_deref()).await;
    let state = AppState::new(store, events, MediaStorage::new(&config.media_root), config.catalog)
        .with_sessions(SessionStore::with_ttl(Duration::from_secs(config.session_ttl_secs)));

    let app = api::router(state).layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive());

    tracing::info!("furniture-store listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?, app).await?;
    Ok(())
}
