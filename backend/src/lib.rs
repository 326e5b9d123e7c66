//! Card Price Tracker
//!
//! Weekly market-price snapshots for graded trading cards.
//!
//! ```text
//!  trigger (cron / operator)
//!        ↓
//!  BatchExecutor ── CandidateSelector ── CardCatalog + SnapshotStore
//!        ↓
//!  query_builder → MarketplaceClient (eBay Browse) → price_aggregator
//!        ↓
//!  SnapshotStore (PostgreSQL, append-only)
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod executor;
pub mod marketplace;
pub mod price_aggregator;
pub mod query_builder;
pub mod selector;
pub mod store;
pub mod types;
