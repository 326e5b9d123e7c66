//! Marketplace Client
//!
//! Thin adapter over the eBay Browse API: one "search active listings" call
//! per query, returning raw price points.
//!
//! The client never retries. Failures are tagged so the batch executor can
//! decide, in one place, whether a retry still fits in the run's deadline:
//! ```text
//! timeout / connect / 408 / 429 / 5xx  →  SearchError::Retryable
//! bad query / 4xx / auth / bad payload →  SearchError::Fatal
//! ```
//! Outgoing requests are paced by a token bucket shared across all
//! concurrent callers of the same client.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{config::MarketplaceConfig, error::TrackerError, types::PricePoint};

/// Tagged marketplace failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SearchError {
    /// Transient: timeout, 5xx, rate limit exceeded
    #[error("{0}")]
    Retryable(String),

    /// Permanent: malformed query, auth failure
    #[error("{0}")]
    Fatal(String),
}

impl SearchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SearchError::Retryable(_))
    }
}

impl From<SearchError> for TrackerError {
    fn from(e: SearchError) -> Self {
        match e {
            SearchError::Retryable(msg) => TrackerError::RetryableFetch(msg),
            SearchError::Fatal(msg) => TrackerError::FatalFetch(msg),
        }
    }
}

#[async_trait]
pub trait MarketplaceClient: Send + Sync {
    /// Search active listings and return their prices.
    async fn search(
        &self,
        query: &str,
        category_id: &str,
        limit: usize,
    ) -> Result<Vec<PricePoint>, SearchError>;
}

// ============================================================================
// RATE LIMITING
// ============================================================================

/// Token bucket refilled continuously at `rate` tokens per second
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

/// Paces outgoing requests. Callers wait for a token instead of being rejected.
#[derive(Debug)]
pub struct RequestRateLimiter {
    bucket: Mutex<TokenBucket>,
    capacity: f64,
    rate: f64,
}

impl RequestRateLimiter {
    /// `per_second` of 0 is treated as 1
    pub fn new(per_second: u32) -> Self {
        let rate = per_second.max(1) as f64;
        Self {
            bucket: Mutex::new(TokenBucket {
                tokens: rate,
                last_refill: Instant::now(),
            }),
            capacity: rate,
            rate,
        }
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.capacity);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate)
            };
            tokio::time::sleep(wait).await;
        }
    }
}

// ============================================================================
// EBAY BROWSE CLIENT
// ============================================================================

/// Application token from the client-credentials grant
#[derive(Debug, Clone)]
struct AppToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    item_summaries: Vec<ItemSummary>,
}

#[derive(Debug, Deserialize)]
struct ItemSummary {
    price: Option<Amount>,
}

#[derive(Debug, Deserialize)]
struct Amount {
    value: String,
}

const TOKEN_SCOPE: &str = "https://api.ebay.com/oauth/api_scope";

/// Tokens are refreshed this long before they expire
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

pub struct EbayBrowseClient {
    http: reqwest::Client,
    config: MarketplaceConfig,
    token: Mutex<Option<AppToken>>,
    limiter: RequestRateLimiter,
}

impl EbayBrowseClient {
    pub fn new(config: MarketplaceConfig) -> crate::error::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self {
            limiter: RequestRateLimiter::new(config.max_requests_per_second),
            http,
            config,
            token: Mutex::new(None),
        })
    }

    async fn app_token(&self) -> Result<String, SearchError> {
        if self.config.app_id.is_empty() || self.config.cert_id.is_empty() {
            return Err(SearchError::Fatal(
                "eBay API credentials not configured".to_string(),
            ));
        }

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        debug!("Requesting eBay application token");
        self.limiter.acquire().await;

        let response = self
            .http
            .post(format!("{}/identity/v1/oauth2/token", self.config.api_base))
            .basic_auth(&self.config.app_id, Some(&self.config.cert_id))
            .form(&[("grant_type", "client_credentials"), ("scope", TOKEN_SCOPE)])
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_transport)?;
        if !status.is_success() {
            warn!("eBay token request failed: {}", status);
            return Err(classify_status(status, &format!("token request: {}", truncate(&body, 200))));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| SearchError::Fatal(format!("Failed to parse token response: {}", e)))?;

        *cached = Some(AppToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });

        Ok(token.access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }
}

#[async_trait]
impl MarketplaceClient for EbayBrowseClient {
    async fn search(
        &self,
        query: &str,
        category_id: &str,
        limit: usize,
    ) -> Result<Vec<PricePoint>, SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::Fatal("Empty search query".to_string()));
        }

        let token = self.app_token().await?;
        self.limiter.acquire().await;

        let limit = limit.to_string();
        let filter = format!("categoryIds:{}", category_id);
        let mut params = vec![("q", query), ("limit", limit.as_str()), ("sort", "price")];
        if !category_id.is_empty() {
            params.push(("filter", filter.as_str()));
        }

        let response = self
            .http
            .get(format!("{}/buy/browse/v1/item_summary/search", self.config.api_base))
            .bearer_auth(&token)
            .header("X-EBAY-C-MARKETPLACE-ID", &self.config.marketplace_id)
            .query(&params)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_transport)?;

        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED {
                self.invalidate_token().await;
            }
            return Err(classify_status(status, truncate(&body, 200)));
        }

        let listings = parse_listings(&body)?;
        debug!("eBay search \"{}\" returned {} priced listings", query, listings.len());

        Ok(listings)
    }
}

/// Priced listings from a Browse search payload. Unpriced and zero-priced items are dropped.
fn parse_listings(body: &str) -> Result<Vec<PricePoint>, SearchError> {
    let response: SearchResponse = serde_json::from_str(body)
        .map_err(|e| SearchError::Fatal(format!("Failed to parse eBay response: {}", e)))?;

    Ok(response
        .item_summaries
        .into_iter()
        .filter_map(|item| item.price)
        .filter_map(|amount| Decimal::from_str(amount.value.trim()).ok())
        .filter(|price| *price > Decimal::ZERO)
        .map(PricePoint::new)
        .collect())
}

/// Map a non-success HTTP status onto the retry taxonomy
pub fn classify_status(status: StatusCode, detail: &str) -> SearchError {
    let message = format!("eBay search failed: {} - {}", status.as_u16(), detail);
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        SearchError::Retryable(message)
    } else {
        SearchError::Fatal(message)
    }
}

fn classify_transport(e: reqwest::Error) -> SearchError {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        SearchError::Retryable(format!("eBay request failed: {}", e))
    } else {
        SearchError::Fatal(format!("eBay request failed: {}", e))
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
