//! REST API
//!
//! Triggers for batch runs and the read interface for price history.
//!
//! ```text
//! GET  /api/cron/update-card-prices   scheduler, bearer CRON_SECRET
//! POST /api/admin/price-tracker       operator run, bearer ADMIN_TOKEN
//! GET  /api/admin/price-tracker       cards needing an update, bearer ADMIN_TOKEN
//! GET  /api/price-history             latest view or full history of one card
//! GET  /api/health
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    cache::CachedSnapshotReader,
    config::BatchRunConfig,
    database::Database,
    error::{Result, TrackerError},
    executor::BatchExecutor,
    price_aggregator,
    store::SnapshotStore,
    types::{CardType, PriceSnapshot, RunReport, RunState, TrendSummary},
};

/// Default number of snapshots returned by the history view (one year of weekly runs)
const DEFAULT_HISTORY_LIMIT: usize = 52;

/// Upper bound per card type when counting cards needing an update
const PENDING_COUNT_LIMIT: usize = 1000;

/// Errors logged per run
const LOGGED_ERRORS: usize = 10;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<BatchExecutor>,
    pub store: Arc<dyn SnapshotStore>,
    pub reader: CachedSnapshotReader,
    /// `None` when running without PostgreSQL
    pub db: Option<Database>,
    pub cron_secret: Option<String>,
    pub admin_token: Option<String>,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Triggers
        .route("/api/cron/update-card-prices", get(run_scheduled_update))
        .route(
            "/api/admin/price-tracker",
            get(pending_updates).post(run_on_demand_update),
        )
        // Read interface
        .route("/api/price-history", get(price_history))
        .route("/api/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// TRIGGERS
// ============================================================================

/// GET /api/cron/update-card-prices
///
/// Weekly scheduled run over the whole corpus. The response is informational.
async fn run_scheduled_update(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<ScheduledRunResponse>)> {
    if let Some(secret) = &state.cron_secret {
        authorize(&headers, secret)?;
    }

    info!("Scheduled price update triggered");
    let report = state.executor.run(&BatchRunConfig::scheduled()).await;
    log_report("Scheduled", &report);

    let aborted = report.state == RunState::Aborted;
    let status = if aborted {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(ScheduledRunResponse {
            success: !aborted,
            message: run_message(&report),
            error: report.selection_error.clone(),
            stats: RunStats::from(&report),
        }),
    ))
}

/// POST /api/admin/price-tracker
///
/// Operator run. The body may hold any `BatchRunConfig` field; an empty
/// body uses the on-demand defaults. Returns the full report.
async fn run_on_demand_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<OnDemandRunResponse>)> {
    authorize_admin(&state, &headers)?;

    let config: BatchRunConfig = if body.iter().all(u8::is_ascii_whitespace) {
        BatchRunConfig::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| TrackerError::BadRequest(format!("Invalid run config: {}", e)))?
    };

    info!("On-demand price update triggered: {:?}", config);
    let report = state.executor.run(&config).await;
    log_report("On-demand", &report);

    let status = if report.state == RunState::Aborted {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(OnDemandRunResponse {
            success: report.state != RunState::Aborted,
            message: run_message(&report),
            result: report,
        }),
    ))
}

/// GET /api/admin/price-tracker
///
/// How many cards of each type are due for a price update.
async fn pending_updates(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<PendingUpdatesResponse>> {
    authorize_admin(&state, &headers)?;

    let mut counts = BTreeMap::new();
    for card_type in CardType::ALL {
        let due = state
            .executor
            .selector()
            .select(&[card_type], PENDING_COUNT_LIMIT)
            .await?;
        counts.insert(card_type.as_str(), due.len());
    }

    Ok(Json(PendingUpdatesResponse {
        success: true,
        total: counts.values().sum(),
        cards_needing_update: counts,
    }))
}

// ============================================================================
// READ INTERFACE
// ============================================================================

/// GET /api/price-history?card_id=...&limit=52&latest_only=false
///
/// `latest_only=true`: newest snapshot plus change versus the preceding one.
/// Otherwise: bounded history plus trend versus the oldest returned point.
async fn price_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryQuery>,
) -> Result<Response> {
    let card_id = params
        .card_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| TrackerError::BadRequest("card_id is required".to_string()))?;

    if params.latest_only.unwrap_or(false) {
        let recent = state.reader.recent(&card_id).await?;
        let (price_change, price_change_percent) = match recent.as_slice() {
            [latest, previous, ..] => price_aggregator::price_change(latest, previous),
            _ => (None, None),
        };

        return Ok(Json(LatestPriceResponse {
            success: true,
            has_history: !recent.is_empty(),
            previous_observed_at: recent.get(1).map(|s| s.observed_at),
            latest: recent.into_iter().next(),
            card_id,
            price_change,
            price_change_percent,
        })
        .into_response());
    }

    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).max(1);
    let history = state.store.history(&card_id, limit).await?;
    let trend = state.store.trend(&history).map(TrendResponse::from);

    Ok(Json(HistoryResponse {
        success: true,
        card_id,
        has_history: !history.is_empty(),
        count: history.len(),
        history,
        trend,
    })
    .into_response())
}

// ============================================================================
// HEALTH
// ============================================================================

/// GET /api/health
///
/// Components that are not configured report `null` and do not count.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = match &state.db {
        Some(db) => Some(db.health_check().await),
        None => None,
    };
    let cache = match state.reader.cache() {
        Some(cache) => Some(cache.health_check().await),
        None => None,
    };

    let healthy = database.unwrap_or(true) && cache.unwrap_or(true);
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            success: healthy,
            database,
            cache,
            timestamp: chrono::Utc::now().timestamp(),
        }),
    )
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Require `Authorization: Bearer <expected>`, compared in constant time
fn authorize(headers: &HeaderMap, expected: &str) -> Result<()> {
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(TrackerError::Unauthorized)?;

    if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(TrackerError::Unauthorized)
    }
}

fn authorize_admin(state: &AppState, headers: &HeaderMap) -> Result<()> {
    match &state.admin_token {
        Some(token) => authorize(headers, token),
        None => Err(TrackerError::Unauthorized),
    }
}

fn run_message(report: &RunReport) -> String {
    match report.state {
        RunState::Aborted => "Price update aborted before any card was processed".to_string(),
        RunState::DeadlineExceeded => format!(
            "Price update stopped at deadline: {} updated, {} failed, {} skipped",
            report.succeeded, report.failed, report.skipped
        ),
        _ => format!(
            "Price update completed: {} updated, {} failed",
            report.succeeded, report.failed
        ),
    }
}

fn log_report(trigger: &str, report: &RunReport) {
    info!(
        "{} run {:?}: {} candidates, {} succeeded, {} failed, {} skipped in {}ms",
        trigger,
        report.state,
        report.total_candidates,
        report.succeeded,
        report.failed,
        report.skipped,
        report.duration_ms
    );

    for e in report.errors.iter().take(LOGGED_ERRORS) {
        warn!("  card {}: {}", e.card_id, e.message);
    }
    if report.errors.len() > LOGGED_ERRORS {
        warn!("  ... and {} more errors", report.errors.len() - LOGGED_ERRORS);
    }
}

// ============================================================================
// REQUEST/RESPONSE TYPES
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub card_id: Option<String>,
    pub limit: Option<usize>,
    pub latest_only: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct RunStats {
    pub total_cards: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub errors_count: usize,
    pub deadline_exceeded: bool,
}

impl From<&RunReport> for RunStats {
    fn from(report: &RunReport) -> Self {
        Self {
            total_cards: report.total_candidates,
            succeeded: report.succeeded,
            failed: report.failed,
            skipped: report.skipped,
            duration_ms: report.duration_ms,
            errors_count: report.errors.len(),
            deadline_exceeded: report.deadline_exceeded,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ScheduledRunResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub stats: RunStats,
}

#[derive(Debug, Serialize)]
pub struct OnDemandRunResponse {
    pub success: bool,
    pub message: String,
    pub result: RunReport,
}

#[derive(Debug, Serialize)]
pub struct PendingUpdatesResponse {
    pub success: bool,
    pub cards_needing_update: BTreeMap<&'static str, usize>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct LatestPriceResponse {
    pub success: bool,
    pub card_id: String,
    pub has_history: bool,
    pub latest: Option<PriceSnapshot>,
    pub previous_observed_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub price_change: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub price_change_percent: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub success: bool,
    pub card_id: String,
    pub has_history: bool,
    pub count: usize,
    pub history: Vec<PriceSnapshot>,
    pub trend: Option<TrendResponse>,
}

#[derive(Debug, Serialize)]
pub struct TrendResponse {
    #[serde(with = "rust_decimal::serde::float_option")]
    pub current_median: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub oldest_median: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub overall_change: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub overall_change_percent: Option<Decimal>,
    pub data_points: usize,
}

impl From<TrendSummary> for TrendResponse {
    fn from(trend: TrendSummary) -> Self {
        Self {
            current_median: trend.current_median,
            oldest_median: trend.oldest_median,
            overall_change: trend.delta,
            overall_change_percent: trend.delta_percent,
            data_points: trend.data_points,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub success: bool,
    pub database: Option<bool>,
    pub cache: Option<bool>,
    pub timestamp: i64,
}

// ============================================================================
// ERROR HANDLING
// ============================================================================

impl IntoResponse for TrackerError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            TrackerError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            TrackerError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            TrackerError::Selection(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            TrackerError::Database(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Database error: {}", e))
            }
            TrackerError::Redis(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Cache error: {}", e))
            }
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        };

        let body = Json(serde_json::json!({
            "success": false,
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::TrackerConfig,
        marketplace::{MarketplaceClient, SearchError},
        store::{MemoryCardCatalog, MemorySnapshotStore},
        types::{CardDetails, CardRef, PricePoint, SearchStrategy},
    };
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Method, Request},
    };
    use chrono::{Duration, Utc};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    const CRON_SECRET: &str = "cron-secret";
    const ADMIN_TOKEN: &str = "admin-token";

    /// Every search returns the same three listings
    struct FixedListings;

    #[async_trait]
    impl MarketplaceClient for FixedListings {
        async fn search(
            &self,
            _query: &str,
            _category_id: &str,
            _limit: usize,
        ) -> std::result::Result<Vec<PricePoint>, SearchError> {
            Ok([10, 20, 30]
                .into_iter()
                .map(|p| PricePoint::new(Decimal::from(p)))
                .collect())
        }
    }

    fn card(id: &str, category: &str, name: &str) -> CardRef {
        CardRef {
            id: id.to_string(),
            category: category.to_string(),
            details: CardDetails {
                card_name: Some(name.to_string()),
                ..Default::default()
            },
        }
    }

    fn snapshot(card_id: &str, median: i64, days_ago: i64) -> PriceSnapshot {
        PriceSnapshot {
            card_id: card_id.to_string(),
            card_type: CardType::Pokemon,
            observed_at: Utc::now() - Duration::days(days_ago),
            median_price: Some(Decimal::from(median)),
            average_price: Some(Decimal::from(median)),
            low_price: Some(Decimal::from(median)),
            high_price: Some(Decimal::from(median)),
            sample_size: 5,
            source_query: "Pikachu 58/102 Base Set".to_string(),
            query_strategy: SearchStrategy::Specific,
        }
    }

    fn test_app(store: Arc<MemorySnapshotStore>) -> Router {
        let catalog = Arc::new(MemoryCardCatalog::new(vec![
            card("p1", "Pokemon", "Pikachu"),
            card("p2", "Pokemon", "Bulbasaur"),
            card("s1", "Baseball", "Ohtani"),
        ]));
        let executor = BatchExecutor::new(
            catalog,
            store.clone(),
            Arc::new(FixedListings),
            TrackerConfig::default(),
        );

        create_router(AppState {
            executor: Arc::new(executor),
            store: store.clone(),
            reader: CachedSnapshotReader::new(store, None),
            db: None,
            cron_secret: Some(CRON_SECRET.to_string()),
            admin_token: Some(ADMIN_TOKEN.to_string()),
        })
    }

    async fn response_json(response: Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap_or(json!({}))
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post(uri: &str, token: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_cron_requires_secret() {
        let app = test_app(Arc::new(MemorySnapshotStore::new()));

        let missing = app
            .clone()
            .oneshot(get("/api/cron/update-card-prices", None))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = app
            .oneshot(get("/api/cron/update-card-prices", Some("nope")))
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
        let body = response_json(wrong).await;
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_cron_runs_scheduled_update() {
        let store = Arc::new(MemorySnapshotStore::new());
        let app = test_app(store.clone());

        let response = app
            .oneshot(get("/api/cron/update-card-prices", Some(CRON_SECRET)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["stats"]["total_cards"], 3);
        assert_eq!(body["stats"]["succeeded"], 3);
        assert_eq!(body["stats"]["skipped"], 0);
        assert_eq!(body["stats"]["deadline_exceeded"], false);
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn test_cron_reports_aborted_run() {
        let store = Arc::new(MemorySnapshotStore::new());
        store.set_unreachable(true);
        let app = test_app(store);

        let response = app
            .oneshot(get("/api/cron/update-card-prices", Some(CRON_SECRET)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["stats"]["total_cards"], 0);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_on_demand_run_with_filters() {
        let store = Arc::new(MemorySnapshotStore::new());
        let app = test_app(store.clone());

        let response = app
            .oneshot(post(
                "/api/admin/price-tracker",
                ADMIN_TOKEN,
                r#"{"limit": 5, "batchSize": 1, "delayBetweenBatches": 0, "card_types": ["pokemon"]}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["result"]["state"], "completed");
        assert_eq!(body["result"]["total_candidates"], 2);
        assert_eq!(body["result"]["succeeded"], 2);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_on_demand_rejects_bad_body_and_token() {
        let app = test_app(Arc::new(MemorySnapshotStore::new()));

        let bad_body = app
            .clone()
            .oneshot(post("/api/admin/price-tracker", ADMIN_TOKEN, "{not json"))
            .await
            .unwrap();
        assert_eq!(bad_body.status(), StatusCode::BAD_REQUEST);

        let bad_token = app
            .oneshot(post("/api/admin/price-tracker", CRON_SECRET, "{}"))
            .await
            .unwrap();
        assert_eq!(bad_token.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_pending_update_counts() {
        let store = Arc::new(MemorySnapshotStore::new());
        store.save(&snapshot("p1", 10, 1)).await.unwrap();
        let app = test_app(store);

        let response = app
            .oneshot(get("/api/admin/price-tracker", Some(ADMIN_TOKEN)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response_json(response).await;
        assert_eq!(body["cards_needing_update"]["pokemon"], 1);
        assert_eq!(body["cards_needing_update"]["sports"], 1);
        assert_eq!(body["cards_needing_update"]["mtg"], 0);
        assert_eq!(body["total"], 2);
    }

    #[tokio::test]
    async fn test_price_history_requires_card_id() {
        let app = test_app(Arc::new(MemorySnapshotStore::new()));

        let response = app.oneshot(get("/api/price-history", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_latest_view_includes_change() {
        let store = Arc::new(MemorySnapshotStore::new());
        store.save(&snapshot("p1", 80, 14)).await.unwrap();
        store.save(&snapshot("p1", 100, 7)).await.unwrap();
        let app = test_app(store);

        let response = app
            .oneshot(get("/api/price-history?card_id=p1&latest_only=true", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response_json(response).await;
        assert_eq!(body["has_history"], true);
        assert_eq!(body["latest"]["median_price"], json!(100.0));
        assert_eq!(body["price_change"], json!(20.0));
        assert_eq!(body["price_change_percent"], json!(25.0));
    }

    #[tokio::test]
    async fn test_full_history_with_trend() {
        let store = Arc::new(MemorySnapshotStore::new());
        store.save(&snapshot("p1", 80, 14)).await.unwrap();
        store.save(&snapshot("p1", 90, 7)).await.unwrap();
        store.save(&snapshot("p1", 100, 0)).await.unwrap();
        let app = test_app(store);

        let response = app
            .oneshot(get("/api/price-history?card_id=p1&limit=2", None))
            .await
            .unwrap();
        let body = response_json(response).await;

        assert_eq!(body["count"], 2);
        assert_eq!(body["history"][0]["median_price"], json!(100.0));
        assert_eq!(body["trend"]["overall_change"], json!(10.0));
        assert_eq!(body["trend"]["data_points"], 2);
    }

    #[tokio::test]
    async fn test_history_for_unknown_card() {
        let app = test_app(Arc::new(MemorySnapshotStore::new()));

        let response = app
            .oneshot(get("/api/price-history?card_id=missing", None))
            .await
            .unwrap();
        let body = response_json(response).await;

        assert_eq!(body["has_history"], false);
        assert_eq!(body["count"], 0);
        assert!(body["trend"].is_null());
    }

    #[tokio::test]
    async fn test_health_without_backends() {
        let app = test_app(Arc::new(MemorySnapshotStore::new()));

        let response = app.oneshot(get("/api/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response_json(response).await;
        assert_eq!(body["success"], true);
        assert!(body["database"].is_null());
    }

    #[test]
    fn test_authorize() {
        let mut headers = HeaderMap::new();
        assert!(matches!(authorize(&headers, "s3cret"), Err(TrackerError::Unauthorized)));

        headers.insert(header::AUTHORIZATION, "Bearer s3cret".parse().unwrap());
        assert!(authorize(&headers, "s3cret").is_ok());
        assert!(authorize(&headers, "s3cret-longer").is_err());

        headers.insert(header::AUTHORIZATION, "Basic s3cret".parse().unwrap());
        assert!(authorize(&headers, "s3cret").is_err());
    }
}
