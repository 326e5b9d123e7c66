use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

/// Opaque card identifier owned by the surrounding application
pub type CardId = String;

/// Card family, used for query shaping and marketplace category mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardType {
    Sports,
    Pokemon,
    Mtg,
    Lorcana,
    OnePiece,
    Other,
}

impl CardType {
    pub const ALL: [CardType; 6] = [
        CardType::Sports,
        CardType::Pokemon,
        CardType::Mtg,
        CardType::Lorcana,
        CardType::OnePiece,
        CardType::Other,
    ];

    /// Derive the card type from the free-form category the grading app stores.
    ///
    /// Unknown categories fall back to `Other`.
    pub fn from_category(category: &str) -> Self {
        match category.trim() {
            "Football" | "Baseball" | "Basketball" | "Hockey" | "Soccer" | "Wrestling"
            | "Sports" => CardType::Sports,
            "Pokemon" | "Pokémon" => CardType::Pokemon,
            "MTG" | "Magic: The Gathering" | "Magic the Gathering" => CardType::Mtg,
            "Lorcana" | "Disney Lorcana" => CardType::Lorcana,
            "One Piece" => CardType::OnePiece,
            _ => CardType::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CardType::Sports => "sports",
            CardType::Pokemon => "pokemon",
            CardType::Mtg => "mtg",
            CardType::Lorcana => "lorcana",
            CardType::OnePiece => "one_piece",
            CardType::Other => "other",
        }
    }
}

impl fmt::Display for CardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CardType {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CardType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| TrackerError::Parse(format!("Unknown card type: {}", s)))
    }
}

/// Descriptive fields extracted by the grading pipeline.
///
/// Older cards carry the legacy names (`featured`, `card_set`,
/// `release_date`, `rookie_or_first`); the accessors prefer the current
/// field and fall back to the legacy one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardDetails {
    pub player_or_character: Option<String>,
    pub card_name: Option<String>,
    pub set_name: Option<String>,
    pub year: Option<String>,
    pub card_number: Option<String>,
    pub card_number_raw: Option<String>,
    pub subset: Option<String>,
    pub rarity_or_variant: Option<String>,
    pub manufacturer: Option<String>,
    pub serial_numbering: Option<String>,
    pub rookie_card: Option<bool>,
    pub is_foil: Option<bool>,
    pub foil_type: Option<String>,
    pub ink_color: Option<String>,

    // Legacy names
    pub featured: Option<String>,
    pub card_set: Option<String>,
    pub release_date: Option<String>,
    pub rookie_or_first: Option<bool>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl CardDetails {
    pub fn player(&self) -> Option<&str> {
        non_empty(&self.player_or_character).or_else(|| non_empty(&self.featured))
    }

    pub fn name(&self) -> Option<&str> {
        non_empty(&self.card_name)
    }

    pub fn set(&self) -> Option<&str> {
        non_empty(&self.set_name).or_else(|| non_empty(&self.card_set))
    }

    pub fn year(&self) -> Option<&str> {
        non_empty(&self.year).or_else(|| non_empty(&self.release_date))
    }

    pub fn number(&self) -> Option<&str> {
        non_empty(&self.card_number_raw).or_else(|| non_empty(&self.card_number))
    }

    pub fn variant(&self) -> Option<&str> {
        non_empty(&self.subset).or_else(|| non_empty(&self.rarity_or_variant))
    }

    pub fn serial(&self) -> Option<&str> {
        non_empty(&self.serial_numbering)
    }

    pub fn is_rookie(&self) -> bool {
        self.rookie_card == Some(true) || self.rookie_or_first == Some(true)
    }

    pub fn is_foil(&self) -> bool {
        self.is_foil == Some(true)
    }
}

/// A card as seen by the price tracker. Read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardRef {
    pub id: CardId,
    pub category: String,
    #[serde(default)]
    pub details: CardDetails,
}

impl CardRef {
    pub fn card_type(&self) -> CardType {
        CardType::from_category(&self.category)
    }
}

/// A single active-listing price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub price: Decimal,
}

impl PricePoint {
    pub fn new(price: Decimal) -> Self {
        Self { price }
    }
}

/// How specific the query that produced a snapshot was
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    Specific,
    Moderate,
    Broad,
    Minimal,
}

impl SearchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStrategy::Specific => "specific",
            SearchStrategy::Moderate => "moderate",
            SearchStrategy::Broad => "broad",
            SearchStrategy::Minimal => "minimal",
        }
    }
}

impl FromStr for SearchStrategy {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "specific" => Ok(SearchStrategy::Specific),
            "moderate" => Ok(SearchStrategy::Moderate),
            "broad" => Ok(SearchStrategy::Broad),
            "minimal" => Ok(SearchStrategy::Minimal),
            other => Err(TrackerError::Parse(format!("Unknown search strategy: {}", other))),
        }
    }
}

/// One observation of market price for one card. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub card_id: CardId,
    pub card_type: CardType,
    pub observed_at: DateTime<Utc>,

    /// `None` when no listings were found
    #[serde(with = "rust_decimal::serde::float_option")]
    pub median_price: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub average_price: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub low_price: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub high_price: Option<Decimal>,

    pub sample_size: u32,

    /// Exact search string used, for auditability
    pub source_query: String,
    pub query_strategy: SearchStrategy,
}

/// Price movement between the newest and oldest point of a history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    #[serde(with = "rust_decimal::serde::float_option")]
    pub current_median: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub oldest_median: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub delta: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub delta_percent: Option<Decimal>,
    pub data_points: usize,
}

/// Batch run lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Selecting,
    Running,
    Completed,
    DeadlineExceeded,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardError {
    pub card_id: CardId,
    pub message: String,
}

/// Outcome of a batch run. Not persisted.
///
/// `total_candidates == succeeded + failed + skipped` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub state: RunState,
    pub total_candidates: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: Vec<CardError>,
    pub duration_ms: u64,
    pub deadline_exceeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection_error: Option<String>,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            state: RunState::Idle,
            total_candidates: 0,
            processed: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            errors: Vec::new(),
            duration_ms: 0,
            deadline_exceeded: false,
            selection_error: None,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.total_candidates == self.succeeded + self.failed + self.skipped
            && self.processed == self.succeeded + self.failed
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_type_from_category() {
        assert_eq!(CardType::from_category("Baseball"), CardType::Sports);
        assert_eq!(CardType::from_category("Pokémon"), CardType::Pokemon);
        assert_eq!(CardType::from_category("Magic: The Gathering"), CardType::Mtg);
        assert_eq!(CardType::from_category("Disney Lorcana"), CardType::Lorcana);
        assert_eq!(CardType::from_category("One Piece"), CardType::OnePiece);
        assert_eq!(CardType::from_category("Yu-Gi-Oh"), CardType::Other);
        assert_eq!(CardType::from_category(""), CardType::Other);
    }

    #[test]
    fn test_card_type_round_trips_through_str() {
        for t in CardType::ALL {
            assert_eq!(t.as_str().parse::<CardType>().unwrap(), t);
        }
        assert!("cricket".parse::<CardType>().is_err());
    }

    #[test]
    fn test_details_prefer_current_fields_over_legacy() {
        let details: CardDetails = serde_json::from_value(serde_json::json!({
            "player_or_character": "",
            "featured": "Wayne Gretzky",
            "set_name": "O-Pee-Chee",
            "card_set": "Topps",
            "release_date": "1979",
            "card_number": "18",
            "card_number_raw": "#18",
            "rookie_or_first": true
        }))
        .unwrap();

        assert_eq!(details.player(), Some("Wayne Gretzky"));
        assert_eq!(details.set(), Some("O-Pee-Chee"));
        assert_eq!(details.year(), Some("1979"));
        assert_eq!(details.number(), Some("#18"));
        assert!(details.is_rookie());
        assert!(!details.is_foil());
    }

    #[test]
    fn test_snapshot_serializes_prices_as_numbers() {
        let snapshot = PriceSnapshot {
            card_id: "card-1".to_string(),
            card_type: CardType::Pokemon,
            observed_at: Utc::now(),
            median_price: Some(Decimal::new(1550, 2)),
            average_price: None,
            low_price: None,
            high_price: None,
            sample_size: 2,
            source_query: "Charizard 4/102".to_string(),
            query_strategy: SearchStrategy::Moderate,
        };

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["median_price"], serde_json::json!(15.5));
        assert!(json["average_price"].is_null());
        assert_eq!(json["card_type"], "pokemon");
        assert_eq!(json["query_strategy"], "moderate");
    }
}
