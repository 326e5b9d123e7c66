//! Redis Cache Layer
//!
//! Read-through cache for the latest price view of a card.
//!
//! # Architecture
//! ```text
//! GET /api/price-history?latest_only=true
//!        ↓
//!   Check Cache → Hit? → Return
//!        ↓
//!      Miss? → Snapshot Store (2 newest) → Store Cache → Return
//! ```
//!
//! # Cache Strategy
//! - TTL: `PRICE_CACHE_TTL_SECONDS` (default 300)
//! - Key format: "card_price:{card_id}"
//! - Value: JSON array of the newest two snapshots, newest first
//!
//! Batch runs never write here. A fresh snapshot becomes visible once the
//! cached entry expires.

use std::sync::Arc;

use redis::{AsyncCommands, aio::ConnectionManager};
use tracing::{debug, warn};

use crate::{
    error::{Result, TrackerError},
    store::SnapshotStore,
    types::PriceSnapshot,
};

/// Snapshots needed to compute a change versus the preceding observation
pub const LATEST_WINDOW: usize = 2;

/// Default cache TTL in seconds
const DEFAULT_CACHE_TTL: u64 = 300;

/// Generate cache key for a card
///
/// # Example
/// "card_price:8f14e45f"
pub fn cache_key(card_id: &str) -> String {
    format!("card_price:{}", card_id)
}

/// Redis cache client
#[derive(Clone)]
pub struct PriceCache {
    /// Redis connection manager (handles reconnection automatically)
    connection: ConnectionManager,

    /// Cache TTL in seconds
    ttl: u64,
}

impl PriceCache {
    /// Create a new price cache
    ///
    /// # Example
    /// ```ignore
    /// let cache = PriceCache::new("redis://127.0.0.1").await?.with_ttl(60);
    /// ```
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;

        debug!("Redis cache connected to {}", redis_url);

        Ok(Self {
            connection,
            ttl: DEFAULT_CACHE_TTL,
        })
    }

    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = ttl;
        self
    }

    /// Store the newest snapshots of a card
    pub async fn set_recent(&self, card_id: &str, snapshots: &[PriceSnapshot]) -> Result<()> {
        let json = serde_json::to_string(snapshots)
            .map_err(|e| TrackerError::Parse(format!("JSON serialize error: {}", e)))?;

        let mut connection = self.connection.clone();
        connection
            .set_ex::<_, _, ()>(cache_key(card_id), json, self.ttl)
            .await?;

        debug!("Cached price view for {} (TTL: {}s)", card_id, self.ttl);
        Ok(())
    }

    /// Retrieve the newest snapshots of a card
    ///
    /// # Returns
    /// - `Some(snapshots)` if cached and not expired
    /// - `None` on a cache miss
    pub async fn get_recent(&self, card_id: &str) -> Result<Option<Vec<PriceSnapshot>>> {
        let mut connection = self.connection.clone();
        let result: Option<String> = connection.get(cache_key(card_id)).await?;

        match result {
            Some(json) => {
                let snapshots = serde_json::from_str(&json)
                    .map_err(|e| TrackerError::Parse(format!("JSON deserialize error: {}", e)))?;
                debug!("Cache HIT for {}", card_id);
                Ok(Some(snapshots))
            }
            None => {
                debug!("Cache MISS for {}", card_id);
                Ok(None)
            }
        }
    }

    /// Check if cache is healthy (can reach Redis)
    pub async fn health_check(&self) -> bool {
        let mut connection = self.connection.clone();
        match redis::cmd("PING")
            .query_async::<_, String>(&mut connection)
            .await
        {
            Ok(response) => response == "PONG",
            Err(e) => {
                warn!("Redis health check failed: {}", e);
                false
            }
        }
    }
}

// ============================================================================
// READ-THROUGH WRAPPER
// ============================================================================

/// Latest-view reader with optional caching
///
/// Runs without Redis when `cache` is `None`. Cache errors are logged and
/// the store answers instead.
#[derive(Clone)]
pub struct CachedSnapshotReader {
    store: Arc<dyn SnapshotStore>,
    cache: Option<PriceCache>,
}

impl CachedSnapshotReader {
    pub fn new(store: Arc<dyn SnapshotStore>, cache: Option<PriceCache>) -> Self {
        Self { store, cache }
    }

    pub fn cache(&self) -> Option<&PriceCache> {
        self.cache.as_ref()
    }

    /// Newest snapshots of a card, at most [`LATEST_WINDOW`], newest first
    pub async fn recent(&self, card_id: &str) -> Result<Vec<PriceSnapshot>> {
        if let Some(cache) = &self.cache {
            match cache.get_recent(card_id).await {
                Ok(Some(snapshots)) => return Ok(snapshots),
                Ok(None) => {}
                Err(e) => warn!("Price cache read failed for {}: {}", card_id, e),
            }
        }

        let snapshots = self.store.history(card_id, LATEST_WINDOW).await?;

        // Empty results are not cached so a first snapshot shows up immediately
        if let (Some(cache), false) = (&self.cache, snapshots.is_empty()) {
            if let Err(e) = cache.set_recent(card_id, &snapshots).await {
                warn!("Price cache write failed for {}: {}", card_id, e);
            }
        }

        Ok(snapshots)
    }
}
