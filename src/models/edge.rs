use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;

use super::{is_valid_card_name, CardId};

/// "YYYY-MM" -> count
pub type MonthlyCounts = BTreeMap<String, i64>;

/// Canonical (sorted) pair of card names
pub type EdgeKey = (CardId, CardId);

/// Month bucket key for a timestamp
pub fn month_key(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y-%m").to_string()
}

/// Parses a strict `YYYY-MM` key into the first day of that month
pub fn parse_month_key(key: &str) -> Option<NaiveDate> {
    let bytes = key.as_bytes();
    if bytes.len() != 7 || bytes[4] != b'-' {
        return None;
    }
    NaiveDate::parse_from_str(&format!("{}-01", key), "%Y-%m-%d").ok()
}

/// Undirected co-occurrence between two distinct cards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub card_a: CardId,
    pub card_b: CardId,
    /// Normalised game code of the decks that formed this edge
    pub game: Option<String>,
    pub weight: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub monthly_counts: MonthlyCounts,
    /// period key -> ("YYYY-MM" -> count)
    pub format_periods: BTreeMap<String, MonthlyCounts>,
}

impl Edge {
    /// Canonical key for an unordered card pair
    pub fn key(a: &str, b: &str) -> EdgeKey {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }

    /// Creates an edge with no recorded occurrences yet
    pub fn new(a: &str, b: &str, timestamp: DateTime<Utc>) -> Self {
        let (card_a, card_b) = Self::key(a, b);
        Self {
            card_a,
            card_b,
            game: None,
            weight: 0,
            first_seen: timestamp,
            last_seen: timestamp,
            monthly_counts: MonthlyCounts::new(),
            format_periods: BTreeMap::new(),
        }
    }

    /// Records one deck containing both cards
    pub fn record_occurrence(&mut self, timestamp: DateTime<Utc>, period_key: Option<&str>) {
        let month = month_key(&timestamp);

        self.weight += 1;
        *self.monthly_counts.entry(month.clone()).or_insert(0) += 1;

        if let Some(period) = period_key {
            *self
                .format_periods
                .entry(period.to_string())
                .or_default()
                .entry(month)
                .or_insert(0) += 1;
        }

        if timestamp < self.first_seen {
            self.first_seen = timestamp;
        }
        if timestamp > self.last_seen {
            self.last_seen = timestamp;
        }
    }

    /// Copy of this edge restricted to occurrences up to `cutoff`.
    ///
    /// Buckets are monthly, so the cutoff month is kept whole. `last_seen` is
    /// capped at `cutoff`. Returns `None` if nothing remains.
    pub fn truncated_to(&self, cutoff: DateTime<Utc>) -> Option<Self> {
        if self.first_seen > cutoff {
            return None;
        }
        let last_month = month_key(&cutoff);
        let keep = |buckets: &MonthlyCounts| -> MonthlyCounts {
            buckets
                .iter()
                .filter(|(month, _)| month.as_str() <= last_month.as_str())
                .map(|(month, count)| (month.clone(), *count))
                .collect()
        };

        let monthly_counts = keep(&self.monthly_counts);
        let weight: i64 = monthly_counts.values().sum();
        if weight <= 0 {
            return None;
        }
        let format_periods = self
            .format_periods
            .iter()
            .map(|(period, buckets)| (period.clone(), keep(buckets)))
            .filter(|(_, buckets)| !buckets.is_empty())
            .collect();

        Some(Self {
            card_a: self.card_a.clone(),
            card_b: self.card_b.clone(),
            game: self.game.clone(),
            weight,
            first_seen: self.first_seen,
            last_seen: self.last_seen.min(cutoff),
            monthly_counts,
            format_periods,
        })
    }

    /// Format names this edge has period buckets for (`Modern_2024` -> `Modern`)
    pub fn formats(&self) -> impl Iterator<Item = &str> {
        self.format_periods
            .keys()
            .map(|period| period.rsplit_once('_').map_or(period.as_str(), |(format, _)| format))
    }

    /// The opposite endpoint, if `card` is one of this edge's endpoints
    pub fn other(&self, card: &str) -> Option<&str> {
        if self.card_a == card {
            Some(&self.card_b)
        } else if self.card_b == card {
            Some(&self.card_a)
        } else {
            None
        }
    }

    /// Checks the structural invariants of a stored edge
    pub fn validate(&self) -> Result<(), String> {
        let pair = format!("({}, {})", self.card_a, self.card_b);

        if !is_valid_card_name(&self.card_a) || !is_valid_card_name(&self.card_b) {
            return Err(format!("edge {:?} has an invalid card name", (&self.card_a, &self.card_b)));
        }
        if self.card_a >= self.card_b {
            return Err(format!("edge {} is not in canonical order", pair));
        }
        if self.first_seen > self.last_seen {
            return Err(format!("edge {} has first_seen after last_seen", pair));
        }

        validate_buckets(&self.monthly_counts).map_err(|e| format!("edge {}: {}", pair, e))?;
        for (period, buckets) in &self.format_periods {
            validate_buckets(buckets)
                .map_err(|e| format!("edge {} period '{}': {}", pair, period, e))?;
        }

        let total: i64 = self.monthly_counts.values().sum();
        if total != self.weight {
            return Err(format!(
                "edge {} weight {} does not match monthly total {}",
                pair, self.weight, total
            ));
        }

        Ok(())
    }
}

fn validate_buckets(buckets: &MonthlyCounts) -> Result<(), String> {
    for (month, count) in buckets {
        if parse_month_key(month).is_none() {
            return Err(format!("invalid month key '{}'", month));
        }
        if *count < 0 {
            return Err(format!("negative count {} for {}", count, month));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_key_is_canonical() {
        assert_eq!(
            Edge::key("Shock", "Bolt"),
            ("Bolt".to_string(), "Shock".to_string())
        );
        assert_eq!(Edge::key("Bolt", "Shock"), Edge::key("Shock", "Bolt"));
    }

    #[test]
    fn test_parse_month_key() {
        assert_eq!(parse_month_key("2024-02"), NaiveDate::from_ymd_opt(2024, 2, 1));
        assert!(parse_month_key("2024-13").is_none());
        assert!(parse_month_key("2024-1").is_none());
        assert!(parse_month_key("202401").is_none());
        assert!(parse_month_key("garbage").is_none());
    }

    #[test]
    fn test_record_occurrence_updates_buckets_and_span() {
        let mut edge = Edge::new("Shock", "Bolt", ts(2024, 2, 10));
        edge.record_occurrence(ts(2024, 2, 10), Some("Modern_2024"));
        edge.record_occurrence(ts(2024, 1, 5), None);

        assert_eq!(edge.card_a, "Bolt");
        assert_eq!(edge.weight, 2);
        assert_eq!(edge.first_seen, ts(2024, 1, 5));
        assert_eq!(edge.last_seen, ts(2024, 2, 10));
        assert_eq!(edge.monthly_counts.get("2024-01"), Some(&1));
        assert_eq!(edge.monthly_counts.get("2024-02"), Some(&1));
        assert_eq!(edge.format_periods["Modern_2024"].get("2024-02"), Some(&1));
        assert!(edge.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_weight_mismatch() {
        let mut edge = Edge::new("A", "B", ts(2024, 1, 1));
        edge.record_occurrence(ts(2024, 1, 1), None);
        edge.weight = 5;
        assert!(edge.validate().unwrap_err().contains("weight"));
    }

    #[test]
    fn test_validate_rejects_bad_month_and_order() {
        let mut edge = Edge::new("A", "B", ts(2024, 1, 1));
        edge.monthly_counts.insert("Jan".to_string(), 0);
        assert!(edge.validate().unwrap_err().contains("invalid month key"));

        let mut swapped = Edge::new("A", "B", ts(2024, 1, 1));
        std::mem::swap(&mut swapped.card_a, &mut swapped.card_b);
        assert!(swapped.validate().unwrap_err().contains("canonical"));
    }

    #[test]
    fn test_validate_rejects_control_characters() {
        let mut edge = Edge::new("A\u{0001}B", "C", ts(2024, 1, 1));
        edge.record_occurrence(ts(2024, 1, 1), None);
        assert!(edge.validate().unwrap_err().contains("invalid card name"));
    }

    #[test]
    fn test_truncated_to_drops_later_months() {
        let mut edge = Edge::new("A", "B", ts(2024, 1, 10));
        edge.record_occurrence(ts(2024, 1, 10), Some("Modern_2024"));
        edge.record_occurrence(ts(2024, 2, 5), Some("Modern_2024"));
        edge.record_occurrence(ts(2024, 6, 1), Some("Legacy_2024"));

        let trimmed = edge.truncated_to(ts(2024, 2, 1)).unwrap();
        assert_eq!(trimmed.weight, 2);
        assert_eq!(trimmed.last_seen, ts(2024, 2, 1));
        assert_eq!(trimmed.monthly_counts.len(), 2);
        assert_eq!(trimmed.format_periods.len(), 1);
        assert!(trimmed.validate().is_ok());

        assert!(edge.truncated_to(ts(2023, 12, 31)).is_none());
        assert_eq!(edge.truncated_to(ts(2024, 6, 30)).unwrap(), edge);
    }

    #[test]
    fn test_formats_strip_period_suffix() {
        let mut edge = Edge::new("A", "B", ts(2025, 11, 2));
        edge.record_occurrence(ts(2025, 11, 2), Some("Advanced_2025-Q4"));
        edge.record_occurrence(ts(2025, 11, 3), Some("Pauper_Commander_2025"));

        let formats: Vec<_> = edge.formats().collect();
        assert_eq!(formats, vec!["Advanced", "Pauper_Commander"]);
    }

    #[test]
    fn test_other_endpoint() {
        let edge = Edge::new("A", "B", ts(2024, 1, 1));
        assert_eq!(edge.other("A"), Some("B"));
        assert_eq!(edge.other("B"), Some("A"));
        assert_eq!(edge.other("C"), None);
    }
}
