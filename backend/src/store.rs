//! Storage Ports
//!
//! The batch engine only talks to storage through these two traits:
//!
//! - [`CardCatalog`]: read-only view of the cards owned by the grading app
//! - [`SnapshotStore`]: append-only price history
//!
//! PostgreSQL implementations live in [`crate::database`]. The in-memory
//! implementations below back the unit tests and local runs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    error::{Result, TrackerError},
    price_aggregator,
    types::{CardId, CardRef, CardType, PriceSnapshot, TrendSummary},
};

/// Append-only price history
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Append a snapshot. There is no uniqueness constraint.
    async fn save(&self, snapshot: &PriceSnapshot) -> Result<()>;

    /// Most recent snapshot by `observed_at`
    async fn latest(&self, card_id: &str) -> Result<Option<PriceSnapshot>>;

    /// Snapshots newest first, capped at `limit`
    async fn history(&self, card_id: &str, limit: usize) -> Result<Vec<PriceSnapshot>>;

    /// Latest `observed_at` per card, for cards that have any history
    async fn last_observed(&self, card_ids: &[CardId]) -> Result<HashMap<CardId, DateTime<Utc>>>;

    fn trend(&self, history: &[PriceSnapshot]) -> Option<TrendSummary> {
        price_aggregator::trend(history)
    }
}

/// Read-only card source
#[async_trait]
pub trait CardCatalog: Send + Sync {
    /// Cards whose derived type is in `card_types`
    async fn cards(&self, card_types: &[CardType]) -> Result<Vec<CardRef>>;
}

// ============================================================================
// IN-MEMORY IMPLEMENTATIONS
// ============================================================================

/// Vec-backed snapshot store with failure injection
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: RwLock<Vec<PriceSnapshot>>,
    failing_saves: RwLock<HashSet<CardId>>,
    unreachable: AtomicBool,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `save` for this card fail
    pub async fn fail_saves_for(&self, card_id: &str) {
        self.failing_saves.write().await.insert(card_id.to_string());
    }

    /// Make every read fail, as if the database were down
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Total snapshots stored, across all cards
    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshots.read().await.is_empty()
    }

    /// Every stored snapshot in insertion order
    pub async fn all(&self) -> Vec<PriceSnapshot> {
        self.snapshots.read().await.clone()
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(TrackerError::Persistence("snapshot store unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, snapshot: &PriceSnapshot) -> Result<()> {
        self.check_reachable()?;
        if self.failing_saves.read().await.contains(&snapshot.card_id) {
            return Err(TrackerError::Persistence(format!(
                "write rejected for card {}",
                snapshot.card_id
            )));
        }

        self.snapshots.write().await.push(snapshot.clone());
        Ok(())
    }

    async fn latest(&self, card_id: &str) -> Result<Option<PriceSnapshot>> {
        Ok(self.history(card_id, 1).await?.into_iter().next())
    }

    async fn history(&self, card_id: &str, limit: usize) -> Result<Vec<PriceSnapshot>> {
        self.check_reachable()?;

        // Reverse insertion order first so equal timestamps keep the later write on top
        let mut history: Vec<PriceSnapshot> = self
            .snapshots
            .read()
            .await
            .iter()
            .rev()
            .filter(|s| s.card_id == card_id)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.observed_at.cmp(&a.observed_at));
        history.truncate(limit);

        Ok(history)
    }

    async fn last_observed(&self, card_ids: &[CardId]) -> Result<HashMap<CardId, DateTime<Utc>>> {
        self.check_reachable()?;

        let wanted: HashSet<&str> = card_ids.iter().map(String::as_str).collect();
        let mut latest: HashMap<CardId, DateTime<Utc>> = HashMap::new();

        for snapshot in self.snapshots.read().await.iter() {
            if !wanted.contains(snapshot.card_id.as_str()) {
                continue;
            }
            latest
                .entry(snapshot.card_id.clone())
                .and_modify(|at| *at = (*at).max(snapshot.observed_at))
                .or_insert(snapshot.observed_at);
        }

        Ok(latest)
    }
}

/// Fixed card list
#[derive(Default)]
pub struct MemoryCardCatalog {
    cards: Vec<CardRef>,
}

impl MemoryCardCatalog {
    pub fn new(cards: Vec<CardRef>) -> Self {
        Self { cards }
    }
}

#[async_trait]
impl CardCatalog for MemoryCardCatalog {
    async fn cards(&self, card_types: &[CardType]) -> Result<Vec<CardRef>> {
        Ok(self
            .cards
            .iter()
            .filter(|card| card_types.contains(&card.card_type()))
            .cloned()
            .collect())
    }
}
