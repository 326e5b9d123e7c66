use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use card_price_tracker::{
    api::{AppState, create_router},
    cache::{CachedSnapshotReader, PriceCache},
    config::Config,
    database::Database,
    executor::BatchExecutor,
    marketplace::EbayBrowseClient,
    store::{CardCatalog, SnapshotStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("Starting card price tracker...");

    let config = Config::from_env()?;

    tracing::info!("Connecting to database...");
    let db = Database::new(&config.database_url).await?;
    db.migrate().await?;

    // Redis only speeds up reads; run without it rather than refuse to start
    tracing::info!("Connecting to Redis...");
    let cache = match PriceCache::new(&config.redis_url).await {
        Ok(cache) => Some(cache.with_ttl(config.price_cache_ttl_seconds)),
        Err(e) => {
            tracing::warn!("Redis unavailable, serving reads from the database: {}", e);
            None
        }
    };

    if config.marketplace.app_id.is_empty() || config.marketplace.cert_id.is_empty() {
        tracing::warn!("eBay credentials missing, every search will fail");
    }
    let marketplace = Arc::new(EbayBrowseClient::new(config.marketplace.clone())?);

    let store: Arc<dyn SnapshotStore> = Arc::new(db.clone());
    let catalog: Arc<dyn CardCatalog> = Arc::new(db.clone());
    let executor = BatchExecutor::new(catalog, store.clone(), marketplace, config.tracker.clone());

    if config.cron_secret.is_none() {
        tracing::warn!("CRON_SECRET not set, scheduled trigger is open");
    }

    let state = AppState {
        executor: Arc::new(executor),
        reader: CachedSnapshotReader::new(store.clone(), cache),
        store,
        db: Some(db),
        cron_secret: config.cron_secret.clone(),
        admin_token: config.admin_token.clone(),
    };

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, create_router(state)).await?;

    Ok(())
}
