//! Candidate Selector
//!
//! Picks the cards a batch run should price, stalest first.
//!
//! # Ordering
//! ```text
//! never priced (by id)  →  oldest snapshot  →  ...  →  newest eligible snapshot
//! ```
//! Cards priced within the refresh interval are not returned at all. Since a
//! full corpus rarely fits one run, whatever was left unprocessed surfaces
//! first next time.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error};

use crate::{
    error::{Result, TrackerError},
    store::{CardCatalog, SnapshotStore},
    types::{CardRef, CardType},
};

pub struct CandidateSelector {
    catalog: Arc<dyn CardCatalog>,
    store: Arc<dyn SnapshotStore>,
    refresh_interval: Duration,
}

impl CandidateSelector {
    pub fn new(
        catalog: Arc<dyn CardCatalog>,
        store: Arc<dyn SnapshotStore>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            catalog,
            store,
            refresh_interval,
        }
    }

    /// Cards needing a price update, oldest snapshot first, at most `limit`.
    ///
    /// Any storage failure is reported as [`TrackerError::Selection`]; no
    /// partial list is ever returned.
    pub async fn select(&self, card_types: &[CardType], limit: usize) -> Result<Vec<CardRef>> {
        let cards = self
            .catalog
            .cards(card_types)
            .await
            .map_err(|e| selection_failed("card catalog", e))?;

        let ids: Vec<String> = cards.iter().map(|c| c.id.clone()).collect();
        let observed = self
            .store
            .last_observed(&ids)
            .await
            .map_err(|e| selection_failed("snapshot store", e))?;

        let interval = chrono::Duration::from_std(self.refresh_interval)
            .map_err(|e| TrackerError::Config(format!("Invalid refresh interval: {}", e)))?;
        let cutoff = Utc::now() - interval;

        let mut candidates: Vec<_> = cards
            .into_iter()
            .map(|card| {
                let last = observed.get(&card.id).copied();
                (last, card)
            })
            .filter(|(last, _)| last.map_or(true, |at| at < cutoff))
            .collect();

        // None sorts before Some, so never-priced cards lead
        candidates.sort_by(|(a_last, a), (b_last, b)| a_last.cmp(b_last).then_with(|| a.id.cmp(&b.id)));
        candidates.truncate(limit);

        debug!(
            "Selected {} candidates ({} never priced)",
            candidates.len(),
            candidates.iter().filter(|(last, _)| last.is_none()).count()
        );

        Ok(candidates.into_iter().map(|(_, card)| card).collect())
    }
}

fn selection_failed(source: &str, e: TrackerError) -> TrackerError {
    error!("Candidate selection failed reading {}: {}", source, e);
    TrackerError::Selection(format!("{} unavailable: {}", source, e))
}
