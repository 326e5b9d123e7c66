//! Query Builder
//!
//! Maps a card's descriptive fields to marketplace search strings and a
//! category identifier. Pure and deterministic: no I/O, no failure mode.
//!
//! Each card type gets a ladder of queries ordered from most specific to
//! most general:
//! ```text
//! "Patrick Mahomes [Silver Prizm] #1 2024 Panini Prizm"   specific
//! "Patrick Mahomes #1 2024 Prizm Silver Prizm"            moderate
//! "Patrick Mahomes 2024 Prizm #1"                         broad
//! "Patrick Mahomes Prizm 2024 #1 football card"           minimal
//! ```
//! The executor walks the ladder until a query returns enough listings.

use crate::types::{CardRef, CardType, SearchStrategy};

/// eBay category identifiers
pub mod categories {
    /// Sports Trading Card Singles
    pub const SPORTS_TRADING_CARDS: &str = "261328";

    /// CCG Individual Cards (Pokemon, MTG, Lorcana, One Piece)
    pub const CCG_INDIVIDUAL_CARDS: &str = "183454";

    /// Non-Sport Trading Card Singles
    pub const NON_SPORT_TRADING_CARDS: &str = "183050";
}

/// A single search string and how specific it is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryStrategy {
    pub query: String,
    pub strategy: SearchStrategy,
}

impl QueryStrategy {
    fn new(query: impl Into<String>, strategy: SearchStrategy) -> Self {
        Self {
            query: query.into(),
            strategy,
        }
    }
}

/// Category identifier for a card type. Every type maps to exactly one category.
pub fn category_id(card_type: CardType) -> &'static str {
    match card_type {
        CardType::Sports => categories::SPORTS_TRADING_CARDS,
        CardType::Pokemon | CardType::Mtg | CardType::Lorcana | CardType::OnePiece => {
            categories::CCG_INDIVIDUAL_CARDS
        }
        CardType::Other => categories::NON_SPORT_TRADING_CARDS,
    }
}

/// Best single query for a card plus its category.
pub fn build_query(card: &CardRef) -> (String, &'static str) {
    let query = build_queries(card)
        .into_iter()
        .next()
        .map(|q| q.query)
        .unwrap_or_else(|| fallback_query(card));

    (query, category_id(card.card_type()))
}

/// Full query ladder for a card, most specific first. Never empty.
pub fn build_queries(card: &CardRef) -> Vec<QueryStrategy> {
    let mut queries = match card.card_type() {
        CardType::Sports => sports_queries(card),
        CardType::Pokemon => ccg_queries(card, "Pokemon"),
        CardType::Lorcana => ccg_queries(card, "Lorcana"),
        CardType::OnePiece => ccg_queries(card, "One Piece"),
        CardType::Mtg => mtg_queries(card),
        CardType::Other => other_queries(card),
    };

    // Identical strings would just burn another request
    let mut seen = std::collections::HashSet::new();
    queries.retain(|q| !q.query.is_empty() && seen.insert(q.query.to_lowercase()));

    if queries.is_empty() {
        queries.push(QueryStrategy::new(fallback_query(card), SearchStrategy::Minimal));
    }

    queries
}

fn fallback_query(card: &CardRef) -> String {
    let category = clean_term(&card.category);
    if category.is_empty() {
        "trading card".to_string()
    } else {
        format!("{} card", category)
    }
}

// ============================================================================
// SPORTS
// ============================================================================

const BRAND_SKIP_WORDS: &[&str] = &[
    // Modern
    "panini", "topps", "upper", "deck", "bowman", "donruss", "fleer", "score", "leaf", "sage",
    "press", "pass", "playoff", "pinnacle", "skybox", "hoops",
    // Vintage
    "imperial", "tobacco", "parkhurst", "o-pee-chee", "goudey", "national", "chicle",
    "american", "caramel", "colgate", "hamilton",
    // Suffixes
    "gum", "company", "co", "inc", "ltd",
];

const GENERIC_PARALLELS: &[&str] = &["base", "common", "parallel", "insert", "variant"];

fn sports_queries(card: &CardRef) -> Vec<QueryStrategy> {
    let d = &card.details;
    let mut queries = Vec::new();

    let Some(player) = d.player().or(d.name()).map(player_name).filter(|p| !p.is_empty())
    else {
        return queries;
    };

    let year = valid_year(d.year());
    let main_set = d.set().map(main_set_name).filter(|s| !s.is_empty());
    let brand = d.set().map(brand_only).filter(|s| !s.is_empty());
    let number = d.number().and_then(clean_card_number).map(|n| sports_number(&n));
    let parallel = d.variant().and_then(parallel_name);
    let serial = d.serial().filter(|s| is_serial_numbered(s));

    let category = card.category.trim().to_lowercase();
    let suffix = if category.is_empty() || category == "sports" {
        "card".to_string()
    } else {
        format!("{} card", category)
    };
    let sport = (!category.is_empty() && category != "sports").then_some(category.as_str());
    let vintage = year
        .as_deref()
        .and_then(|y| y.parse::<u32>().ok())
        .is_some_and(|y| y < 1980);

    let mut specific = vec![player.clone()];
    specific.extend(parallel.as_ref().map(|p| format!("[{}]", p)));
    specific.extend(number.clone());
    specific.extend(year.clone());
    specific.extend(main_set.clone());
    specific.extend(serial.map(str::to_string));
    if specific.len() >= 3 {
        queries.push(QueryStrategy::new(specific.join(" "), SearchStrategy::Specific));
    }

    let mut moderate = vec![player.clone()];
    moderate.extend(number.clone());
    moderate.extend(year.clone());
    moderate.extend(brand.clone());
    moderate.extend(parallel.clone());
    if moderate.len() >= 3 {
        queries.push(QueryStrategy::new(moderate.join(" "), SearchStrategy::Moderate));
    }

    let mut broad = vec![player.clone()];
    broad.extend(year.clone());
    broad.extend(brand.clone());
    broad.extend(number.clone());
    if vintage && brand.is_none() {
        broad.extend(sport.map(str::to_string));
    }
    if broad.len() >= 2 {
        queries.push(QueryStrategy::new(broad.join(" "), SearchStrategy::Broad));
    }

    let mut minimal = vec![player.clone()];
    minimal.extend(brand.clone());
    minimal.extend(year.clone());
    minimal.extend(number.clone());
    if d.is_rookie() {
        minimal.push("Rookie".to_string());
    }
    minimal.push(suffix.clone());
    queries.push(QueryStrategy::new(minimal.join(" "), SearchStrategy::Minimal));

    match &brand {
        Some(brand) => queries.push(QueryStrategy::new(
            format!("{} {} {}", player, brand, suffix),
            SearchStrategy::Minimal,
        )),
        None => queries.push(QueryStrategy::new(
            format!("{} {}", player, suffix),
            SearchStrategy::Minimal,
        )),
    }

    queries
}

/// First three words of the player/character name
fn player_name(featured: &str) -> String {
    clean_term(featured)
        .split(' ')
        .take(3)
        .collect::<Vec<_>>()
        .join(" ")
}

/// "SELECT WWE - Prizm" -> "SELECT WWE"
fn main_set_name(set: &str) -> String {
    let main = set.split('-').next().unwrap_or(set);
    clean_term(main)
}

/// "Panini Prizm" -> "Prizm"
fn brand_only(set: &str) -> String {
    let main = main_set_name(set);
    let words: Vec<&str> = main.split(' ').collect();
    if words.len() >= 2 {
        let kept: Vec<&str> = words
            .iter()
            .copied()
            .filter(|w| !BRAND_SKIP_WORDS.contains(&w.to_lowercase().as_str()))
            .collect();
        if !kept.is_empty() {
            return kept.join(" ");
        }
    }
    main
}

fn parallel_name(variant: &str) -> Option<String> {
    let cleaned = clean_term(variant);
    if cleaned.is_empty() || GENERIC_PARALLELS.contains(&cleaned.to_lowercase().as_str()) {
        None
    } else {
        Some(cleaned)
    }
}

fn is_serial_numbered(serial: &str) -> bool {
    serial
        .split('/')
        .nth(1)
        .is_some_and(|n| n.starts_with(|c: char| c.is_ascii_digit()))
}

/// Numeric card numbers read better with a `#` prefix; "SS-MS" stays as is
fn sports_number(number: &str) -> String {
    if number.chars().all(|c| c.is_ascii_digit()) {
        format!("#{}", number)
    } else {
        number.to_string()
    }
}

// ============================================================================
// COLLECTIBLE CARD GAMES (Pokemon, Lorcana, One Piece)
// ============================================================================

const GENERIC_CCG_VARIANTS: &[&str] = &["base", "common", "uncommon", "rare", "holo rare"];
const POKEMON_SUFFIXES: &[&str] = &["ex", "EX", "V", "VMAX", "VSTAR", "GX", "Tag Team"];

fn ccg_queries(card: &CardRef, game: &str) -> Vec<QueryStrategy> {
    let d = &card.details;
    let mut queries = Vec::new();

    let name = d.name().map(clean_ccg_name).filter(|s| !s.is_empty());
    let character = d.player().map(clean_ccg_name).filter(|s| !s.is_empty());
    let number = d.number().map(strip_number_label).filter(|s| !s.is_empty());
    let set = d.set().map(clean_term).filter(|s| !s.is_empty());
    let variant = d
        .variant()
        .map(clean_term)
        .filter(|v| !v.is_empty() && !GENERIC_CCG_VARIANTS.contains(&v.to_lowercase().as_str()));

    if let (Some(name), Some(number)) = (&name, &number) {
        let mut parts = vec![name.clone(), number.clone()];
        parts.extend(set.clone());
        queries.push(QueryStrategy::new(parts.join(" "), SearchStrategy::Specific));
        queries.push(QueryStrategy::new(
            format!("{} {}", name, number),
            SearchStrategy::Moderate,
        ));
    }

    if let (Some(name), Some(set)) = (&name, &set) {
        let mut parts = vec![name.clone(), set.clone()];
        parts.extend(variant.clone());
        queries.push(QueryStrategy::new(parts.join(" "), SearchStrategy::Moderate));
    }

    if let (Some(character), Some(number)) = (&character, &number) {
        let search_name = match &name {
            Some(name) if game == "Pokemon" => with_pokemon_suffix(character, name),
            _ => character.clone(),
        };
        queries.push(QueryStrategy::new(
            format!("{} {} {}", search_name, number, game),
            SearchStrategy::Broad,
        ));
    }

    if let Some(name) = &name {
        queries.push(QueryStrategy::new(
            format!("{} {} card", name, game),
            SearchStrategy::Minimal,
        ));
    }

    if let (Some(character), Some(set)) = (&character, &set) {
        queries.push(QueryStrategy::new(
            format!("{} {} {}", character, set, game),
            SearchStrategy::Minimal,
        ));
    }

    if queries.is_empty() {
        if let Some(character) = &character {
            queries.push(QueryStrategy::new(
                format!("{} {} card", character, game),
                SearchStrategy::Minimal,
            ));
        }
    }

    queries
}

/// "Mewtwo" + "Team Rocket's Mewtwo ex" -> "Mewtwo ex"
fn with_pokemon_suffix(character: &str, card_name: &str) -> String {
    let name_lower = card_name.to_lowercase();
    let character_lower = character.to_lowercase();
    POKEMON_SUFFIXES
        .iter()
        .find(|suffix| {
            let suffix = suffix.to_lowercase();
            name_lower.split(' ').any(|w| w == suffix)
                && !character_lower.split(' ').any(|w| w == suffix)
        })
        .map(|suffix| format!("{} {}", character, suffix))
        .unwrap_or_else(|| character.to_string())
}

/// Apostrophes and punctuation become spaces
fn clean_ccg_name(name: &str) -> String {
    collapse(&name.replace(|c: char| !c.is_alphanumeric() && !c.is_whitespace(), " "))
}

// ============================================================================
// MAGIC: THE GATHERING
// ============================================================================

fn mtg_queries(card: &CardRef) -> Vec<QueryStrategy> {
    let d = &card.details;
    let mut queries = Vec::new();

    let Some(name) = d.name().or(d.player()).map(clean_mtg_name).filter(|s| !s.is_empty())
    else {
        return queries;
    };

    let set = d.set().map(clean_term).filter(|s| !s.is_empty());
    let number = d.number().map(|n| n.trim().to_string()).filter(|s| !s.is_empty());
    let year = valid_year(d.year());
    let foil = d.is_foil().then_some("foil".to_string());

    if let (Some(set), Some(number)) = (&set, &number) {
        let mut parts = vec![name.clone(), set.clone(), number.clone()];
        parts.extend(foil.clone());
        queries.push(QueryStrategy::new(
            format!("{} MTG", parts.join(" ")),
            SearchStrategy::Specific,
        ));
    }

    if let Some(set) = &set {
        let mut parts = vec![name.clone(), set.clone()];
        parts.extend(foil.clone());
        queries.push(QueryStrategy::new(
            format!("{} MTG", parts.join(" ")),
            SearchStrategy::Moderate,
        ));
    }

    if let Some(number) = &number {
        queries.push(QueryStrategy::new(
            format!("{} {} MTG", name, number),
            SearchStrategy::Moderate,
        ));
    }

    if let Some(year) = &year {
        let mut parts = vec![name.clone(), year.clone()];
        parts.extend(foil.clone());
        queries.push(QueryStrategy::new(
            format!("{} MTG", parts.join(" ")),
            SearchStrategy::Broad,
        ));
    }

    queries.push(QueryStrategy::new(
        format!("{} MTG card", name),
        SearchStrategy::Minimal,
    ));

    queries
}

/// Keeps commas, apostrophes and hyphens, which appear in real card names
fn clean_mtg_name(name: &str) -> String {
    collapse(&name.replace(
        |c: char| !c.is_alphanumeric() && !c.is_whitespace() && !",'-".contains(c),
        " ",
    ))
}

// ============================================================================
// OTHER / NON-SPORT
// ============================================================================

fn other_queries(card: &CardRef) -> Vec<QueryStrategy> {
    let d = &card.details;
    let mut queries = Vec::new();

    let featured = d
        .player()
        .or(d.name())
        .map(clean_other_name)
        .filter(|s| !s.is_empty());
    let raw_set = d.set().unwrap_or_default();
    let is_autograph = raw_set.to_lowercase().contains("autograph")
        || d.variant().is_some_and(|v| v.to_lowercase().contains("autograph"));
    let set = Some(strip_word(&clean_term(raw_set), "autograph")).filter(|s| !s.is_empty());
    let number = d.number().and_then(clean_card_number).map(|n| sports_number(&n));
    let manufacturer = d.manufacturer.as_deref().map(clean_term).filter(|s| !s.is_empty());

    if let Some(featured) = &featured {
        if let Some(number) = &number {
            queries.push(QueryStrategy::new(
                format!("{} {}", featured, number),
                SearchStrategy::Specific,
            ));
            if is_autograph {
                queries.push(QueryStrategy::new(
                    format!("{} {} autograph", featured, number),
                    SearchStrategy::Specific,
                ));
            }
            if let Some(set) = &set {
                queries.push(QueryStrategy::new(
                    format!("{} {} {}", featured, set, number),
                    SearchStrategy::Specific,
                ));
            }
        }
        if is_autograph {
            queries.push(QueryStrategy::new(
                format!("{} autograph card", featured),
                SearchStrategy::Moderate,
            ));
        }
        if let Some(set) = &set {
            queries.push(QueryStrategy::new(
                format!("{} {}", featured, set),
                SearchStrategy::Moderate,
            ));
        }
        if let Some(manufacturer) = &manufacturer {
            queries.push(QueryStrategy::new(
                format!("{} {}", featured, manufacturer),
                SearchStrategy::Moderate,
            ));
        }
    }

    if let (Some(set), Some(number)) = (&set, &number) {
        queries.push(QueryStrategy::new(
            format!("{} {}", set, number),
            SearchStrategy::Moderate,
        ));
    }

    match &featured {
        Some(featured) => {
            queries.push(QueryStrategy::new(
                format!("{} card", featured),
                SearchStrategy::Broad,
            ));
            queries.push(QueryStrategy::new(featured.clone(), SearchStrategy::Minimal));
        }
        None => {
            if let (Some(set), Some(number)) = (&set, &number) {
                queries.push(QueryStrategy::new(
                    format!("{} {} trading card", set, number),
                    SearchStrategy::Minimal,
                ));
            }
        }
    }

    queries
}

/// Keeps hyphens
fn clean_other_name(name: &str) -> String {
    collapse(&name.replace(
        |c: char| !c.is_alphanumeric() && !c.is_whitespace() && c != '-',
        " ",
    ))
}

fn strip_word(text: &str, word: &str) -> String {
    text.split(' ')
        .filter(|w| !w.eq_ignore_ascii_case(word))
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// SHARED CLEANING
// ============================================================================

/// Punctuation other than `#` and `_` becomes whitespace; whitespace is collapsed
fn clean_term(term: &str) -> String {
    collapse(&term.replace(
        |c: char| !c.is_alphanumeric() && !c.is_whitespace() && c != '#' && c != '_',
        " ",
    ))
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Accepts "2024", "2024-25", "2024-01-15"; rejects anything before 1900
fn valid_year(year: Option<&str>) -> Option<String> {
    let prefix: String = year?.trim().chars().take(4).collect();
    if prefix.len() == 4 && prefix.chars().all(|c| c.is_ascii_digit()) {
        let value: u32 = prefix.parse().ok()?;
        (value >= 1900).then_some(prefix)
    } else {
        None
    }
}

/// Removes "Card Number:", "Card #", "Number", "No." and "#" prefixes
fn strip_number_label(raw: &str) -> String {
    const LABELS: &[&str] = &["card number", "card #", "number", "no."];

    let mut rest = raw.trim().replace(['\r', '\n'], " ");
    let lower = rest.to_ascii_lowercase();
    if let Some(label) = LABELS.iter().find(|l| lower.starts_with(*l)) {
        rest = rest[label.len()..].to_string();
    } else if lower.starts_with("no ") || lower.starts_with("no:") {
        rest = rest[2..].to_string();
    }

    let rest = rest.trim_start().trim_start_matches(':').trim_start();
    rest.trim_start_matches('#').trim().to_string()
}

/// First token of the label-free number, e.g. "RA-ABS" from "Card #: RA-ABS (auto)"
fn clean_card_number(raw: &str) -> Option<String> {
    strip_number_label(raw)
        .split_whitespace()
        .next()
        .map(str::to_string)
}
