use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::CardType;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string
    pub redis_url: String,

    /// Server host
    pub server_host: String,

    /// Server port
    pub server_port: u16,

    /// Shared secret the scheduler presents as a bearer token.
    /// When unset the scheduled trigger is open.
    pub cron_secret: Option<String>,

    /// Operator token for the on-demand trigger. When unset every request is rejected.
    pub admin_token: Option<String>,

    /// Seconds a latest-price lookup stays in Redis
    pub price_cache_ttl_seconds: u64,

    pub marketplace: MarketplaceConfig,

    pub tracker: TrackerConfig,
}

/// Marketplace (eBay Browse) settings
#[derive(Debug, Clone)]
pub struct MarketplaceConfig {
    pub app_id: String,
    pub cert_id: String,
    pub api_base: String,
    pub marketplace_id: String,
    pub max_requests_per_second: u32,
    pub request_timeout_ms: u64,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            cert_id: String::new(),
            api_base: "https://api.ebay.com".to_string(),
            marketplace_id: "EBAY_US".to_string(),
            max_requests_per_second: 5,
            request_timeout_ms: 10_000,
        }
    }
}

/// Batch engine settings shared by every run
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// Cards whose latest snapshot is younger than this are not selected
    pub refresh_interval: Duration,

    /// Retries after the first attempt on a retryable marketplace error
    pub max_retries: u32,

    /// Fixed pause before each retry
    pub retry_backoff: Duration,

    /// Listings requested per search
    pub search_limit: usize,

    /// A query returning at least this many listings stops the strategy ladder
    pub min_results: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(7 * 24 * 3600),
            max_retries: 2,
            retry_backoff: Duration::from_millis(500),
            search_limit: 25,
            min_results: 3,
        }
    }
}

/// Parameters of a single batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchRunConfig {
    /// Max candidates to consider
    pub limit: usize,

    /// Cards processed concurrently per wave
    #[serde(alias = "batchSize")]
    pub batch_size: usize,

    #[serde(alias = "delayBetweenBatches")]
    pub inter_batch_delay_ms: u64,

    /// Empty means every card type
    #[serde(alias = "cardTypes")]
    pub card_types: Vec<CardType>,

    /// Hard deadline, checked at batch boundaries
    #[serde(alias = "maxDurationMs")]
    pub max_duration_ms: Option<u64>,
}

impl Default for BatchRunConfig {
    /// On-demand defaults
    fn default() -> Self {
        Self {
            limit: 50,
            batch_size: 5,
            inter_batch_delay_ms: 2000,
            card_types: Vec::new(),
            max_duration_ms: None,
        }
    }
}

impl BatchRunConfig {
    /// Weekly run: whole corpus, stopping well before a 300s host timeout
    pub fn scheduled() -> Self {
        Self {
            limit: 10_000,
            batch_size: 5,
            inter_batch_delay_ms: 2000,
            card_types: CardType::ALL.to_vec(),
            max_duration_ms: Some(270_000),
        }
    }

    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    pub fn effective_card_types(&self) -> Vec<CardType> {
        if self.card_types.is_empty() {
            CardType::ALL.to_vec()
        } else {
            self.card_types.clone()
        }
    }

    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_ms.map(Duration::from_millis)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().parse()?),
        _ => Ok(default),
    }
}

fn refresh_interval_days(days: u64) -> anyhow::Result<Duration> {
    days.checked_mul(24 * 3600)
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow::anyhow!("PRICE_REFRESH_INTERVAL_DAYS out of range: {}", days))
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let marketplace_defaults = MarketplaceConfig::default();
        let tracker_defaults = TrackerConfig::default();

        Ok(Config {
            database_url: std::env::var("DATABASE_URL")?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1".to_string()),
            server_host: std::env::var("SERVER_HOST")
                .unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env_or("SERVER_PORT", 8080)?,
            cron_secret: env_opt("CRON_SECRET"),
            admin_token: env_opt("ADMIN_TOKEN"),
            price_cache_ttl_seconds: env_or("PRICE_CACHE_TTL_SECONDS", 300)?,
            marketplace: MarketplaceConfig {
                // Browse API only has inventory in production
                app_id: env_opt("EBAY_PROD_APP_ID")
                    .or_else(|| env_opt("EBAY_APP_ID"))
                    .unwrap_or_default(),
                cert_id: env_opt("EBAY_PROD_CERT_ID")
                    .or_else(|| env_opt("EBAY_CERT_ID"))
                    .unwrap_or_default(),
                api_base: env_opt("EBAY_API_BASE").unwrap_or(marketplace_defaults.api_base),
                marketplace_id: env_opt("EBAY_MARKETPLACE_ID")
                    .unwrap_or(marketplace_defaults.marketplace_id),
                max_requests_per_second: env_or(
                    "MARKETPLACE_MAX_REQUESTS_PER_SECOND",
                    marketplace_defaults.max_requests_per_second,
                )?,
                request_timeout_ms: env_or(
                    "MARKETPLACE_REQUEST_TIMEOUT_MS",
                    marketplace_defaults.request_timeout_ms,
                )?,
            },
            tracker: TrackerConfig {
                refresh_interval: refresh_interval_days(env_or("PRICE_REFRESH_INTERVAL_DAYS", 7)?)?,
                max_retries: env_or("FETCH_MAX_RETRIES", tracker_defaults.max_retries)?,
                retry_backoff: Duration::from_millis(env_or("FETCH_RETRY_BACKOFF_MS", 500)?),
                search_limit: env_or("SEARCH_LIMIT", tracker_defaults.search_limit)?,
                min_results: env_or("SEARCH_MIN_RESULTS", tracker_defaults.min_results)?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_config_defaults_from_empty_body() {
        let config: BatchRunConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, BatchRunConfig::default());
        assert_eq!(config.effective_card_types(), CardType::ALL.to_vec());
        assert_eq!(config.max_duration(), None);
    }

    #[test]
    fn test_run_config_accepts_camel_case_aliases() {
        let config: BatchRunConfig = serde_json::from_value(serde_json::json!({
            "limit": 10,
            "batchSize": 2,
            "delayBetweenBatches": 0,
            "cardTypes": ["pokemon", "sports"]
        }))
        .unwrap();

        assert_eq!(config.limit, 10);
        assert_eq!(config.batch_size, 2);
        assert_eq!(config.inter_batch_delay_ms, 0);
        assert_eq!(config.card_types, vec![CardType::Pokemon, CardType::Sports]);
    }

    #[test]
    fn test_zero_batch_size_is_normalised() {
        let config = BatchRunConfig {
            batch_size: 0,
            ..BatchRunConfig::default()
        };
        assert_eq!(config.effective_batch_size(), 1);
    }

    #[test]
    fn test_refresh_interval_days_rejects_overflow() {
        assert_eq!(
            refresh_interval_days(7).unwrap(),
            Duration::from_secs(7 * 24 * 3600)
        );
        assert!(refresh_interval_days(u64::MAX).is_err());
    }

    #[test]
    fn test_scheduled_preset_stays_under_host_timeout() {
        let config = BatchRunConfig::scheduled();
        assert_eq!(config.max_duration(), Some(Duration::from_secs(270)));
        assert_eq!(config.card_types.len(), CardType::ALL.len());
    }
}
