//! OpenSASE Storefront - digital-goods order, payment and fulfillment service

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opensase_storefront::api::{router, AppState};
use opensase_storefront::config::{Config, StoreBackend};
use opensase_storefront::events::EventPublisher;
use opensase_storefront::store::{MemoryStore, PgStore, Store};
use opensase_storefront::sweeper;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();

    let config = Config::from_env()?;
    let store: Arc<dyn Store> = match (&config.store_backend, &config.database_url) {
        (StoreBackend::Postgres, Some(url)) => {
            let db = PgPoolOptions::new().max_connections(10).connect(url).await?;
            sqlx::migrate!("./migrations").run(&db).await?;
            Arc::new(PgStore::new(db))
        }
        (StoreBackend::Postgres, None) => anyhow::bail!("STORE_BACKEND=postgres requires DATABASE_URL"),
        (StoreBackend::Memory, _) => {
            tracing::warn!("using the in-memory store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let nats = match &config.nats_url {
        Some(url) => async_nats::connect(url.as_str()).await.map_err(|e| tracing::warn!(error = %e, "NATS unavailable, events are log-only")).ok(),
        None => None,
    };
    let events = EventPublisher::new(nats);

    tokio::spawn(sweeper::run_periodic(
        store.clone(),
        events.clone(),
        chrono::Duration::minutes(config.order_expiry_minutes),
        std::time::Duration::from_secs(config.sweep_interval_secs),
    ));

    let port = config.port;
    let app = router(AppState::new(store, config, events));

    tracing::info!("🚀 OpenSASE Storefront listening on 0.0.0.0:{}", port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?, app).await?;
    Ok(())
}
