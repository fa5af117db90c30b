use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

use crate::error::{AppError, AppResult};

use super::CardId;

/// One card entry in an ingested deck
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeckCard {
    pub name: String,
    #[serde(default = "default_count")]
    pub count: u32,
}

fn default_count() -> u32 {
    1
}

impl DeckCard {
    pub fn new(name: impl Into<String>, count: u32) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

/// Deck record as produced by the deck-ingestion collaborator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeckRecord {
    pub cards: Vec<DeckCard>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub game: Option<String>,
}

impl DeckRecord {
    pub fn new(cards: Vec<DeckCard>, timestamp: DateTime<Utc>) -> Self {
        Self {
            cards,
            timestamp,
            format: None,
            game: None,
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_game(mut self, game: impl Into<String>) -> Self {
        self.game = Some(game.into());
        self
    }

    /// Parses one JSON ingestion record
    pub fn from_json(line: &str) -> AppResult<Self> {
        serde_json::from_str(line).map_err(|e| AppError::Parse(format!("malformed deck record: {}", e)))
    }

    /// Distinct card names present in the deck.
    ///
    /// Names are trimmed; blank names, names with control characters and
    /// zero-count entries are dropped.
    pub fn card_names(&self) -> BTreeSet<CardId> {
        distinct_card_names(&self.cards)
    }
}

pub(crate) fn distinct_card_names(cards: &[DeckCard]) -> BTreeSet<CardId> {
    cards
        .iter()
        .filter(|card| card.count > 0)
        .map(|card| card.name.trim())
        .filter(|name| {
            if name.chars().any(char::is_control) {
                tracing::warn!(name = ?name, "Dropping card name with control characters");
                return false;
            }
            !name.is_empty()
        })
        .map(str::to_string)
        .collect()
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

/// Parses an ISO-8601 timestamp.
///
/// Accepts RFC 3339 with an offset, naive date-times (`T` or space separated,
/// optional fractional seconds) and bare dates. Naive values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> AppResult<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }

    Err(AppError::Parse(format!("unrecognised timestamp '{}'", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike};

    #[test]
    fn test_parse_timestamp_rfc3339_with_offset() {
        let ts = parse_timestamp("2024-01-15T10:00:00+02:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_timestamp_naive_and_date_only() {
        let naive = parse_timestamp("2024-03-01T12:30:45.250").unwrap();
        assert_eq!(naive.hour(), 12);
        assert_eq!(naive.nanosecond(), 250_000_000);

        let spaced = parse_timestamp("2024-03-01 12:30:45").unwrap();
        assert_eq!(spaced.minute(), 30);

        let date = parse_timestamp("2024-03-01").unwrap();
        assert_eq!((date.year(), date.month(), date.day()), (2024, 3, 1));
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(matches!(parse_timestamp("last tuesday"), Err(AppError::Parse(_))));
    }

    #[test]
    fn test_deck_record_from_json() {
        let record = DeckRecord::from_json(
            r#"{"cards":[{"name":"Lightning Bolt","count":4},{"name":"Mountain"}],
                "timestamp":"2024-01-10T00:00:00Z","format":"Modern","game":null}"#,
        )
        .unwrap();

        assert_eq!(record.cards.len(), 2);
        assert_eq!(record.cards[1].count, 1);
        assert_eq!(record.format.as_deref(), Some("Modern"));
        assert_eq!(record.game, None);
    }

    #[test]
    fn test_deck_record_from_json_rejects_bad_timestamp() {
        let result = DeckRecord::from_json(r#"{"cards":[],"timestamp":"soon"}"#);
        assert!(matches!(result, Err(AppError::Parse(_))));
    }

    #[test]
    fn test_card_names_dedupes_and_drops_blank() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record = DeckRecord::new(
            vec![
                DeckCard::new("Bolt", 4),
                DeckCard::new(" Bolt ", 1),
                DeckCard::new("   ", 2),
                DeckCard::new("Shock", 0),
                DeckCard::new("Mountain", 20),
            ],
            ts,
        );

        let names: Vec<_> = record.card_names().into_iter().collect();
        assert_eq!(names, vec!["Bolt".to_string(), "Mountain".to_string()]);
    }

    #[test]
    fn test_card_names_drops_control_characters() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record = DeckRecord::new(
            vec![
                DeckCard::new("A\u{0001}B", 1),
                DeckCard::new("Bolt\tShock", 1),
                DeckCard::new("Two\nLines", 1),
                DeckCard::new("Chain Lightning", 1),
            ],
            ts,
        );

        let names: Vec<_> = record.card_names().into_iter().collect();
        assert_eq!(names, vec!["Chain Lightning".to_string()]);
    }
}
