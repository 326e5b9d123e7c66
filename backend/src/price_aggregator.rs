//! Price Aggregator
//!
//! Turns the raw listing prices of one search into a statistical snapshot,
//! and derives price trends from pairs of historical snapshots.
//!
//! # Architecture
//! ```text
//! listings [12.00, 15.50, 9.99, 40.00]
//!          ↓
//!     [Aggregator]  →  median 13.75 · avg 19.37 · low 9.99 · high 40.00 · n=4
//!          ↓
//!   Snapshot Store (append)
//! ```
//!
//! Trend is never stored on a snapshot. It is derived on read so that any
//! two points of a history can be compared the same way.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

use crate::{
    query_builder::QueryStrategy,
    types::{CardType, PricePoint, PriceSnapshot, TrendSummary},
};

/// Round a monetary amount to cents, half-up
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Aggregate listings observed now.
///
/// `previous` is the card's latest snapshot before this one. It only feeds
/// the change logged for the card; nothing derived from it is stored.
///
/// # Example
/// ```ignore
/// let snapshot = aggregate("card-1", CardType::Pokemon, &query, &listings, None);
/// assert_eq!(snapshot.sample_size, listings.len() as u32);
/// ```
pub fn aggregate(
    card_id: &str,
    card_type: CardType,
    query: &QueryStrategy,
    listings: &[PricePoint],
    previous: Option<&PriceSnapshot>,
) -> PriceSnapshot {
    let snapshot = aggregate_at(card_id, card_type, query, listings, Utc::now());

    if let Some(previous) = previous {
        if let (Some(delta), _) = price_change(&snapshot, previous) {
            debug!(
                "Card {} median moved {} since {}",
                card_id, delta, previous.observed_at
            );
        }
    }

    snapshot
}

/// Aggregate listings with an explicit observation time.
///
/// # Algorithm
/// 1. Zero listings: every price is `None`, `sample_size = 0`. The snapshot
///    is still an observation ("no market data"), distinct from "not checked".
/// 2. Sort prices ascending.
/// 3. Median: middle value, or the mean of the two middle values for even counts.
/// 4. Average: arithmetic mean. Low/high: min/max.
/// 5. Round everything to 2 decimal places, half-up.
pub fn aggregate_at(
    card_id: &str,
    card_type: CardType,
    query: &QueryStrategy,
    listings: &[PricePoint],
    observed_at: DateTime<Utc>,
) -> PriceSnapshot {
    let mut prices: Vec<Decimal> = listings.iter().map(|p| p.price).collect();
    prices.sort();

    let sample_size = prices.len() as u32;
    let average = if prices.is_empty() {
        None
    } else {
        let sum: Decimal = prices.iter().copied().sum();
        Some(round_money(sum / Decimal::from(prices.len())))
    };

    PriceSnapshot {
        card_id: card_id.to_string(),
        card_type,
        observed_at,
        median_price: median(&prices).map(round_money),
        average_price: average,
        low_price: prices.first().copied().map(round_money),
        high_price: prices.last().copied().map(round_money),
        sample_size,
        source_query: query.query.clone(),
        query_strategy: query.strategy,
    }
}

/// Median of an ascending slice
///
/// # Example
/// ```text
/// [10, 20, 30]  →  20
/// [10, 20]      →  15
/// ```
pub fn median(sorted: &[Decimal]) -> Option<Decimal> {
    let len = sorted.len();
    if len == 0 {
        return None;
    }

    if len % 2 == 1 {
        Some(sorted[len / 2])
    } else {
        Some((sorted[len / 2 - 1] + sorted[len / 2]) / Decimal::from(2))
    }
}

/// Change of `newer` relative to `older`, as `(delta, delta_percent)`.
///
/// `delta` is absent when either median is absent. `delta_percent` is also
/// absent when the older median is zero. Percent is rounded to 1 decimal place.
pub fn price_change(
    newer: &PriceSnapshot,
    older: &PriceSnapshot,
) -> (Option<Decimal>, Option<Decimal>) {
    match (newer.median_price, older.median_price) {
        (Some(new), Some(old)) => {
            let delta = round_money(new - old);
            let percent = (!old.is_zero()).then(|| {
                ((new - old) / old * Decimal::ONE_HUNDRED)
                    .round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero)
            });
            (Some(delta), percent)
        }
        _ => (None, None),
    }
}

/// Trend over a history: newest point versus oldest point.
///
/// Returns `None` for fewer than two points. A trend of one point is absent,
/// not zero.
///
/// # Formula
/// ```text
/// delta         = newest.median - oldest.median
/// delta_percent = delta / oldest.median × 100
/// ```
pub fn trend(history: &[PriceSnapshot]) -> Option<TrendSummary> {
    if history.len() < 2 {
        return None;
    }

    let newest = history.iter().max_by_key(|s| s.observed_at)?;
    let oldest = history.iter().min_by_key(|s| s.observed_at)?;
    let (delta, delta_percent) = price_change(newest, oldest);

    Some(TrendSummary {
        current_median: newest.median_price,
        oldest_median: oldest.median_price,
        delta,
        delta_percent,
        data_points: history.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SearchStrategy;
    use chrono::Duration;

    fn query() -> QueryStrategy {
        QueryStrategy {
            query: "Charizard 4/102 Base Set".to_string(),
            strategy: SearchStrategy::Specific,
        }
    }

    fn points(values: &[i64]) -> Vec<PricePoint> {
        values.iter().map(|v| PricePoint::new(Decimal::from(*v))).collect()
    }

    fn snapshot_with_median(median: Option<i64>, observed_at: DateTime<Utc>) -> PriceSnapshot {
        let mut snapshot = aggregate_at("card-1", CardType::Pokemon, &query(), &[], observed_at);
        snapshot.median_price = median.map(Decimal::from);
        snapshot
    }

    #[test]
    fn test_zero_listings_is_an_explicit_no_data_observation() {
        let snapshot = aggregate("card-1", CardType::Pokemon, &query(), &[], None);

        assert_eq!(snapshot.sample_size, 0);
        assert_eq!(snapshot.median_price, None);
        assert_eq!(snapshot.average_price, None);
        assert_eq!(snapshot.low_price, None);
        assert_eq!(snapshot.high_price, None);
        assert_eq!(snapshot.source_query, "Charizard 4/102 Base Set");
    }

    #[test]
    fn test_median_odd_count() {
        let snapshot = aggregate("card-1", CardType::Pokemon, &query(), &points(&[30, 10, 20]), None);

        assert_eq!(snapshot.median_price, Some(Decimal::from(20)));
        assert_eq!(snapshot.average_price, Some(Decimal::from(20)));
        assert_eq!(snapshot.low_price, Some(Decimal::from(10)));
        assert_eq!(snapshot.high_price, Some(Decimal::from(30)));
        assert_eq!(snapshot.sample_size, 3);
    }

    #[test]
    fn test_median_even_count() {
        let snapshot = aggregate("card-1", CardType::Pokemon, &query(), &points(&[10, 20]), None);
        assert_eq!(snapshot.median_price, Some(Decimal::from(15)));
    }

    #[test]
    fn test_rounding_is_half_up_to_cents() {
        // mean = 10.005 → 10.01; median of [10.00, 10.01] = 10.005 → 10.01
        let listings = vec![
            PricePoint::new(Decimal::new(1000, 2)),
            PricePoint::new(Decimal::new(1001, 2)),
        ];
        let snapshot = aggregate("card-1", CardType::Sports, &query(), &listings, None);

        assert_eq!(snapshot.median_price, Some(Decimal::new(1001, 2)));
        assert_eq!(snapshot.average_price, Some(Decimal::new(1001, 2)));
        assert_eq!(round_money(Decimal::new(1, 3)), Decimal::new(0, 2));
        assert_eq!(round_money(Decimal::new(5, 3)), Decimal::new(1, 2));
    }

    #[test]
    fn test_trend_over_two_points() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::days(7);
        let history = vec![
            snapshot_with_median(Some(100), t1),
            snapshot_with_median(Some(80), t0),
        ];

        let trend = trend(&history).unwrap();
        assert_eq!(trend.delta, Some(Decimal::from(20)));
        assert_eq!(trend.delta_percent, Some(Decimal::from(25)));
        assert_eq!(trend.current_median, Some(Decimal::from(100)));
        assert_eq!(trend.oldest_median, Some(Decimal::from(80)));
        assert_eq!(trend.data_points, 2);
    }

    #[test]
    fn test_trend_is_absent_for_single_point() {
        let history = vec![snapshot_with_median(Some(100), Utc::now())];
        assert_eq!(trend(&history), None);
        assert_eq!(trend(&[]), None);
    }

    #[test]
    fn test_trend_percent_absent_for_zero_or_null_base() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::days(7);

        let zero_base = vec![
            snapshot_with_median(Some(10), t1),
            snapshot_with_median(Some(0), t0),
        ];
        let trend_zero = trend(&zero_base).unwrap();
        assert_eq!(trend_zero.delta, Some(Decimal::from(10)));
        assert_eq!(trend_zero.delta_percent, None);

        let null_base = vec![
            snapshot_with_median(Some(10), t1),
            snapshot_with_median(None, t0),
        ];
        let trend_null = trend(&null_base).unwrap();
        assert_eq!(trend_null.delta, None);
        assert_eq!(trend_null.delta_percent, None);
    }

    #[test]
    fn test_trend_uses_extremes_of_longer_history() {
        let t0 = Utc::now();
        let history = vec![
            snapshot_with_median(Some(90), t0 + Duration::days(14)),
            snapshot_with_median(Some(200), t0 + Duration::days(7)),
            snapshot_with_median(Some(60), t0),
        ];

        let trend = trend(&history).unwrap();
        assert_eq!(trend.delta, Some(Decimal::from(30)));
        assert_eq!(trend.delta_percent, Some(Decimal::from(50)));
        assert_eq!(trend.data_points, 3);
    }
}
