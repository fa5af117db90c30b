use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-card bookkeeping kept alongside the node set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardNode {
    /// Normalised game code (`MTG`, `PKM`, `YGO`), first one seen wins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    /// Decks that contained this card
    #[serde(default)]
    pub total_decks: u64,
}

impl CardNode {
    /// Node first seen in a deck at `timestamp`
    pub fn seen_at(timestamp: DateTime<Utc>, game: Option<&str>) -> Self {
        Self {
            game: game.map(str::to_string),
            first_seen: Some(timestamp),
            last_seen: Some(timestamp),
            total_decks: 1,
        }
    }

    /// Records one more deck containing this card
    pub fn record_deck(&mut self, timestamp: DateTime<Utc>, game: Option<&str>) {
        self.total_decks += 1;
        if self.first_seen.map_or(true, |first| timestamp < first) {
            self.first_seen = Some(timestamp);
        }
        if self.last_seen.map_or(true, |last| timestamp > last) {
            self.last_seen = Some(timestamp);
        }
        if self.game.is_none() {
            self.game = game.map(str::to_string);
        }
    }
}

/// True when `name` is usable as a card id: non-empty, no control characters
pub fn is_valid_card_name(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(char::is_control)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_deck_widens_span_and_keeps_first_game() {
        let jan = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mar = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        let mut node = CardNode::seen_at(mar, None);
        node.record_deck(jan, Some("MTG"));
        node.record_deck(mar, Some("PKM"));

        assert_eq!(node.first_seen, Some(jan));
        assert_eq!(node.last_seen, Some(mar));
        assert_eq!(node.total_decks, 3);
        assert_eq!(node.game.as_deref(), Some("MTG"));
    }

    #[test]
    fn test_card_name_validity() {
        assert!(is_valid_card_name("Jötun Grunt"));
        assert!(!is_valid_card_name(""));
        assert!(!is_valid_card_name("A\u{0001}B"));
        assert!(!is_valid_card_name("Bolt\tShock"));
        assert!(!is_valid_card_name("Line\nBreak"));
    }
}
