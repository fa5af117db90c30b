use chrono::{DateTime, Datelike, NaiveDate, Utc};

/// Maps a (game, format, time) triple onto a rule-legality period key.
///
/// Implementations are owned by the composition root and shared read-only with
/// the graph, so they must be cheap and side-effect free.
pub trait FormatPeriodResolver: Send + Sync {
    fn period_key(&self, game: Option<&str>, format: &str, at: DateTime<Utc>) -> String;
}

/// Pokémon Standard rotations: (effective date, newest legal regulation mark)
const PKM_STANDARD_ROTATIONS: &[(i32, u32, u32, &str)] = &[
    (2023, 4, 14, "F"),
    (2024, 4, 5, "G"),
    (2025, 4, 11, "H"),
];

/// Game-aware period keys
///
/// - Yu-Gi-Oh: ban-list quarter, `Advanced_2025-Q4`
/// - Pokémon Standard: regulation mark in force, `Standard_H`
/// - anything else: calendar year, `Modern_2024`
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFormatPeriodResolver;

impl DefaultFormatPeriodResolver {
    /// Normalises game names to short codes (`magic` -> `MTG`)
    pub fn normalize_game(game: &str) -> Option<&'static str> {
        match game.trim().to_lowercase().as_str() {
            "magic" | "mtg" => Some("MTG"),
            "pokemon" | "pkm" => Some("PKM"),
            "yugioh" | "ygo" => Some("YGO"),
            _ => None,
        }
    }

    fn regulation_mark(at: DateTime<Utc>) -> Option<&'static str> {
        let date = at.date_naive();
        PKM_STANDARD_ROTATIONS
            .iter()
            .rev()
            .find(|(y, m, d, _)| {
                NaiveDate::from_ymd_opt(*y, *m, *d)
                    .map(|effective| effective <= date)
                    .unwrap_or(false)
            })
            .map(|(_, _, _, mark)| *mark)
    }
}

impl FormatPeriodResolver for DefaultFormatPeriodResolver {
    fn period_key(&self, game: Option<&str>, format: &str, at: DateTime<Utc>) -> String {
        let format = format.trim();
        let year = at.year();

        match game.and_then(Self::normalize_game) {
            Some("YGO") => {
                let quarter = (at.month() - 1) / 3 + 1;
                format!("{}_{}-Q{}", format, year, quarter)
            }
            Some("PKM") if format.eq_ignore_ascii_case("standard") => match Self::regulation_mark(at) {
                Some(mark) => format!("{}_{}", format, mark),
                None => format!("{}_{}", format, year),
            },
            _ => format!("{}_{}", format, year),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_normalize_game() {
        assert_eq!(DefaultFormatPeriodResolver::normalize_game("Magic"), Some("MTG"));
        assert_eq!(DefaultFormatPeriodResolver::normalize_game("pokemon"), Some("PKM"));
        assert_eq!(DefaultFormatPeriodResolver::normalize_game(" YGO "), Some("YGO"));
        assert_eq!(DefaultFormatPeriodResolver::normalize_game("chess"), None);
    }

    #[test]
    fn test_yugioh_uses_quarters() {
        let resolver = DefaultFormatPeriodResolver;
        assert_eq!(
            resolver.period_key(Some("yugioh"), "Advanced", ts(2025, 11, 2)),
            "Advanced_2025-Q4"
        );
        assert_eq!(
            resolver.period_key(Some("YGO"), "Advanced", ts(2025, 1, 31)),
            "Advanced_2025-Q1"
        );
    }

    #[test]
    fn test_pokemon_standard_uses_regulation_mark() {
        let resolver = DefaultFormatPeriodResolver;
        assert_eq!(resolver.period_key(Some("pokemon"), "Standard", ts(2025, 6, 1)), "Standard_H");
        assert_eq!(resolver.period_key(Some("pokemon"), "Standard", ts(2025, 4, 10)), "Standard_G");
        assert_eq!(resolver.period_key(Some("pokemon"), "Standard", ts(2020, 1, 1)), "Standard_2020");
        assert_eq!(resolver.period_key(Some("pokemon"), "Expanded", ts(2025, 6, 1)), "Expanded_2025");
    }

    #[test]
    fn test_default_is_calendar_year() {
        let resolver = DefaultFormatPeriodResolver;
        assert_eq!(resolver.period_key(Some("magic"), "Modern", ts(2024, 3, 1)), "Modern_2024");
        assert_eq!(resolver.period_key(None, " Legacy ", ts(2023, 12, 31)), "Legacy_2023");
    }
}
