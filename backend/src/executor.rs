//! Batch Executor
//!
//! Drives one price-update run from candidate selection to the final report.
//!
//! # Run lifecycle
//! ```text
//! Idle → Selecting ──(store down)──────────────→ Aborted
//!            ↓
//!         Running → batch 1 ∥∥∥∥∥ → delay → batch 2 ∥∥∥∥∥ → ... → Completed
//!                         (deadline hit at a batch boundary) → DeadlineExceeded
//! ```
//!
//! # Per card
//! ```text
//! build_queries → search (retry on transient errors) → next strategy?
//!       → aggregate → save
//! ```
//!
//! Cards inside a batch run concurrently; batches run one after another.
//! At most `batch_size` searches are in flight at any time. The deadline is
//! checked only between batches, so a run can overrun by one batch.
//! Cards that never start are `skipped`; cards that start and do not end
//! with a saved snapshot are `failed`. One card's failure never stops a run.

use std::sync::Arc;

use futures::future::join_all;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

use crate::{
    config::{BatchRunConfig, TrackerConfig},
    marketplace::{MarketplaceClient, SearchError},
    price_aggregator,
    query_builder::{self, QueryStrategy},
    selector::CandidateSelector,
    store::{CardCatalog, SnapshotStore},
    types::{CardError, CardRef, PricePoint, PriceSnapshot, RunReport, RunState, SearchStrategy},
};

pub struct BatchExecutor {
    selector: CandidateSelector,
    marketplace: Arc<dyn MarketplaceClient>,
    store: Arc<dyn SnapshotStore>,
    config: TrackerConfig,
}

impl BatchExecutor {
    pub fn new(
        catalog: Arc<dyn CardCatalog>,
        store: Arc<dyn SnapshotStore>,
        marketplace: Arc<dyn MarketplaceClient>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            selector: CandidateSelector::new(catalog, store.clone(), config.refresh_interval),
            marketplace,
            store,
            config,
        }
    }

    pub fn selector(&self) -> &CandidateSelector {
        &self.selector
    }

    /// Execute one run. Always returns a report, even when aborted.
    pub async fn run(&self, run: &BatchRunConfig) -> RunReport {
        let started = Instant::now();
        let deadline = run.max_duration().map(|budget| started + budget);
        let batch_size = run.effective_batch_size();
        let card_types = run.effective_card_types();

        let mut report = RunReport::new();
        report.state = RunState::Selecting;

        info!(
            "Starting price update run: limit={}, batch_size={}, delay={}ms, types={:?}",
            run.limit, batch_size, run.inter_batch_delay_ms, card_types
        );

        let candidates = match self.selector.select(&card_types, run.limit).await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!("Price update run aborted: {}", e);
                report.state = RunState::Aborted;
                report.selection_error = Some(e.to_string());
                report.duration_ms = elapsed_ms(started);
                return report;
            }
        };

        report.total_candidates = candidates.len();
        report.state = RunState::Running;
        let total_batches = candidates.len().div_ceil(batch_size);

        info!(
            "Selected {} cards in {} batches",
            report.total_candidates, total_batches
        );

        for (index, batch) in candidates.chunks(batch_size).enumerate() {
            let delay = run.inter_batch_delay();
            // A delay that would end past the deadline is not slept
            let out_of_time = deadline_passed(deadline)
                || (index > 0 && !delay.is_zero() && deadline_before(deadline, Instant::now() + delay));

            if index > 0 && !out_of_time && !delay.is_zero() {
                sleep(delay).await;
            }

            if out_of_time || deadline_passed(deadline) {
                report.skipped = report.total_candidates - index * batch_size;
                report.deadline_exceeded = true;
                warn!(
                    "Run deadline reached after {} of {} batches, skipping {} cards",
                    index, total_batches, report.skipped
                );
                break;
            }

            let outcomes = join_all(batch.iter().map(|card| self.process_card(card, deadline))).await;

            for (card, outcome) in batch.iter().zip(outcomes) {
                match outcome {
                    Ok(snapshot) => {
                        report.succeeded += 1;
                        debug!(
                            "Card {} priced: median={:?} n={} via {} query",
                            card.id,
                            snapshot.median_price,
                            snapshot.sample_size,
                            snapshot.query_strategy.as_str()
                        );
                    }
                    Err(message) => {
                        report.failed += 1;
                        warn!("Card {} failed: {}", card.id, message);
                        report.errors.push(CardError {
                            card_id: card.id.clone(),
                            message,
                        });
                    }
                }
            }

            info!(
                "Batch {}/{} done: {} succeeded, {} failed so far",
                index + 1,
                total_batches,
                report.succeeded,
                report.failed
            );
        }

        report.processed = report.succeeded + report.failed;
        report.state = if report.deadline_exceeded {
            RunState::DeadlineExceeded
        } else {
            RunState::Completed
        };
        report.duration_ms = elapsed_ms(started);

        info!(
            "Price update run finished in {}ms: {} succeeded, {} failed, {} skipped",
            report.duration_ms, report.succeeded, report.failed, report.skipped
        );

        report
    }

    /// Price one card. `Err` carries the message recorded in the report.
    async fn process_card(
        &self,
        card: &CardRef,
        deadline: Option<Instant>,
    ) -> Result<PriceSnapshot, String> {
        let card_type = card.card_type();
        let category_id = query_builder::category_id(card_type);

        let (query, listings) = self
            .search_card(card, category_id, deadline)
            .await
            .map_err(|e| format!("Search failed: {}", e))?;

        let previous = match self.store.latest(&card.id).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!("Could not read previous snapshot for {}: {}", card.id, e);
                None
            }
        };

        let snapshot =
            price_aggregator::aggregate(&card.id, card_type, &query, &listings, previous.as_ref());

        self.store
            .save(&snapshot)
            .await
            .map_err(|e| format!("Failed to save snapshot: {}", e))?;

        Ok(snapshot)
    }

    /// Walk the query ladder from most to least specific.
    ///
    /// The first query reaching `min_results` wins. Otherwise the best
    /// non-minimal query with any listings wins, then the query with the
    /// most listings overall. A search error ends the ladder.
    async fn search_card(
        &self,
        card: &CardRef,
        category_id: &str,
        deadline: Option<Instant>,
    ) -> Result<(QueryStrategy, Vec<PricePoint>), SearchError> {
        let queries = query_builder::build_queries(card);
        let fallback = queries.first().cloned();

        let mut best_specific: Option<(QueryStrategy, Vec<PricePoint>)> = None;
        let mut best_overall: Option<(QueryStrategy, Vec<PricePoint>)> = None;

        for query in queries {
            let listings = self.search_with_retry(&query.query, category_id, deadline).await?;

            if listings.len() >= self.config.min_results {
                return Ok((query, listings));
            }

            debug!(
                "Query \"{}\" found {} listings, below threshold {}",
                query.query,
                listings.len(),
                self.config.min_results
            );

            if !listings.is_empty()
                && query.strategy != SearchStrategy::Minimal
                && best_specific.as_ref().map_or(true, |(_, l)| listings.len() > l.len())
            {
                best_specific = Some((query.clone(), listings.clone()));
            }

            if best_overall.as_ref().map_or(true, |(_, l)| listings.len() > l.len()) {
                best_overall = Some((query, listings));
            }
        }

        match best_specific.or(best_overall) {
            Some(best) => Ok(best),
            None => Ok((
                fallback.unwrap_or_else(|| QueryStrategy {
                    query: card.category.clone(),
                    strategy: SearchStrategy::Minimal,
                }),
                Vec::new(),
            )),
        }
    }

    /// One search with up to `max_retries` retries on transient errors.
    ///
    /// A retry whose backoff would end past the run deadline is not attempted.
    async fn search_with_retry(
        &self,
        query: &str,
        category_id: &str,
        deadline: Option<Instant>,
    ) -> Result<Vec<PricePoint>, SearchError> {
        let mut retries = 0;

        loop {
            match self
                .marketplace
                .search(query, category_id, self.config.search_limit)
                .await
            {
                Ok(listings) => return Ok(listings),
                Err(e) if e.is_retryable() && retries < self.config.max_retries => {
                    if deadline.is_some_and(|d| Instant::now() + self.config.retry_backoff > d) {
                        warn!("No time left to retry \"{}\": {}", query, e);
                        return Err(e);
                    }

                    retries += 1;
                    warn!(
                        "Retrying \"{}\" ({}/{}) after: {}",
                        query, retries, self.config.max_retries, e
                    );
                    sleep(self.config.retry_backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

fn deadline_before(deadline: Option<Instant>, at: Instant) -> bool {
    deadline.is_some_and(|d| d <= at)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
