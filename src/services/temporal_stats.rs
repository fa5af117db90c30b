//! Summary statistics over an edge's monthly buckets.
//!
//! All functions are pure and total: malformed month keys are skipped with a
//! warning and empty input yields a neutral value, never an error.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

use crate::models::{parse_month_key, MonthlyCounts};

const DEFAULT_DECAY_DAYS: f64 = 365.0;

/// Consistency reported for an empty histogram
pub const EMPTY_CONSISTENCY: f64 = 0.0;

/// Months covered by `TemporalStats::recent_trend`
pub const RECENT_TREND_MONTHS: usize = 6;

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TemporalStats {
    pub months_active: usize,
    pub peak_month: Option<String>,
    pub peak_count: i64,
    pub activity_span_days: i64,
    pub average_monthly: f64,

    /// Occurrence distribution, each occurrence placed at the start of its month
    pub mean_date: Option<DateTime<Utc>>,
    pub median_date: Option<DateTime<Utc>>,
    pub p25_date: Option<DateTime<Utc>>,
    pub p75_date: Option<DateTime<Utc>>,
    pub std_days: f64,
    /// Positive when occurrences lean towards recent months
    pub skewness: f64,
    /// Excess kurtosis
    pub kurtosis: f64,

    pub consistency_score: f64,
    /// Coefficient of variation of the monthly counts
    pub volatility: f64,
    /// Slope over the last [`RECENT_TREND_MONTHS`] active months
    pub recent_trend: f64,
}

fn month_start(month: &str) -> Option<DateTime<Utc>> {
    parse_month_key(month).map(|date: NaiveDate| date.and_time(NaiveTime::MIN).and_utc())
}

/// Count-weighted occurrence times, in seconds since the epoch
struct Occurrences {
    /// (timestamp, count), ascending
    samples: Vec<(f64, f64)>,
    total: f64,
}

impl Occurrences {
    fn new(buckets: &[(&str, i64)]) -> Option<Self> {
        let samples: Vec<(f64, f64)> = buckets
            .iter()
            .filter(|(_, count)| *count > 0)
            .filter_map(|(month, count)| Some((month_start(month)?.timestamp() as f64, *count as f64)))
            .collect();
        let total: f64 = samples.iter().map(|(_, c)| c).sum();
        (total > 0.0).then_some(Self { samples, total })
    }

    fn mean(&self) -> f64 {
        self.samples.iter().map(|(t, c)| t * c).sum::<f64>() / self.total
    }

    /// `k`-th central moment
    fn moment(&self, mean: f64, k: i32) -> f64 {
        self.samples.iter().map(|(t, c)| c * (t - mean).powi(k)).sum::<f64>() / self.total
    }

    /// Value at sorted position `i` of the expanded sample
    fn at(&self, i: f64) -> f64 {
        let mut seen = 0.0;
        for (t, c) in &self.samples {
            seen += c;
            if i < seen {
                return *t;
            }
        }
        self.samples.last().map_or(0.0, |(t, _)| *t)
    }

    /// Percentile with linear interpolation between neighbouring occurrences
    fn percentile(&self, p: f64) -> f64 {
        let position = p * (self.total - 1.0);
        let (lo, hi) = (position.floor(), position.ceil());
        let (lo_value, hi_value) = (self.at(lo), self.at(hi));
        lo_value + (hi_value - lo_value) * (position - lo)
    }
}

fn to_datetime(seconds: f64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(seconds.round() as i64, 0)
}

/// Population coefficient of variation, 0 for fewer than two values or a
/// non-positive mean
fn volatility(counts: &[f64]) -> f64 {
    if counts.len() < 2 {
        return 0.0;
    }
    let n = counts.len() as f64;
    let mean = counts.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt() / mean
}

/// Buckets with a valid month key, in chronological order
fn valid_buckets(monthly_counts: &MonthlyCounts) -> Vec<(&str, i64)> {
    monthly_counts
        .iter()
        .filter_map(|(month, count)| {
            if parse_month_key(month).is_some() {
                Some((month.as_str(), *count))
            } else {
                tracing::warn!(month = %month, "Skipping malformed month key");
                None
            }
        })
        .collect()
}

/// Activity summary for one edge over `[window_start, window_end]`
pub fn compute_temporal_stats(
    monthly_counts: &MonthlyCounts,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    total_weight: i64,
) -> TemporalStats {
    let buckets = valid_buckets(monthly_counts);
    if buckets.is_empty() {
        return TemporalStats::default();
    }

    // First maximum wins, so ties resolve to the earliest month.
    let (peak_month, peak_count) = buckets
        .iter()
        .fold(None::<(&str, i64)>, |best, &(month, count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((month, count)),
        })
        .unwrap_or(("", 0));

    let months_active = buckets.len();
    let counts: Vec<f64> = buckets.iter().map(|(_, count)| (*count).max(0) as f64).collect();

    let mut stats = TemporalStats {
        months_active,
        peak_month: Some(peak_month.to_string()),
        peak_count,
        activity_span_days: (window_end - window_start).num_days().max(0),
        average_monthly: total_weight as f64 / months_active as f64,
        consistency_score: compute_consistency(monthly_counts),
        volatility: volatility(&counts),
        recent_trend: compute_trend(monthly_counts, RECENT_TREND_MONTHS),
        ..TemporalStats::default()
    };

    if let Some(occurrences) = Occurrences::new(&buckets) {
        let mean = occurrences.mean();
        let std = occurrences.moment(mean, 2).sqrt();

        stats.mean_date = to_datetime(mean);
        stats.median_date = to_datetime(occurrences.percentile(0.5));
        stats.p25_date = to_datetime(occurrences.percentile(0.25));
        stats.p75_date = to_datetime(occurrences.percentile(0.75));
        stats.std_days = std / SECONDS_PER_DAY;
        if occurrences.total > 1.0 && std > 0.0 {
            stats.skewness = occurrences.moment(mean, 3) / std.powi(3);
            stats.kurtosis = occurrences.moment(mean, 4) / std.powi(4) - 3.0;
        }
    }

    stats
}

/// Recency-weighted activity in `[0, 1]`.
///
/// Each month bucket contributes `count * exp(-age_days / decay_days)`, with the
/// age measured from the first day of the month to `as_of`. The result is the
/// count-weighted average of those decay factors. Future months, non-positive
/// counts and malformed keys are ignored.
pub fn compute_recency_score(
    monthly_counts: &MonthlyCounts,
    as_of: DateTime<Utc>,
    decay_days: f64,
) -> f64 {
    let decay_days = if decay_days <= 0.0 || !decay_days.is_finite() {
        DEFAULT_DECAY_DAYS
    } else {
        decay_days
    };

    let mut weighted = 0.0;
    let mut total = 0.0;

    for (month, count) in valid_buckets(monthly_counts) {
        if count <= 0 {
            continue;
        }
        let Some(start) = month_start(month) else {
            continue;
        };
        let age_days = (as_of - start).num_days();
        if age_days < 0 {
            continue;
        }

        let decay = (-(age_days as f64) / decay_days).exp();
        weighted += count as f64 * decay;
        total += count as f64;
    }

    if total > 0.0 {
        (weighted / total).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Uniformity of activity across months in `[0, 1]`, `1 / (1 + cv)`.
///
/// Returns [`EMPTY_CONSISTENCY`] for an empty histogram and 1.0 for a single month.
pub fn compute_consistency(monthly_counts: &MonthlyCounts) -> f64 {
    let counts: Vec<f64> = valid_buckets(monthly_counts)
        .into_iter()
        .map(|(_, count)| count.max(0) as f64)
        .collect();

    match counts.len() {
        0 => EMPTY_CONSISTENCY,
        1 => 1.0,
        _ if counts.iter().sum::<f64>() <= 0.0 => 0.0,
        _ => 1.0 / (1.0 + volatility(&counts)),
    }
}

/// Least-squares slope of the most recent `lookback_months` buckets.
///
/// Positive means co-occurrence is increasing. Fewer than two buckets in the
/// window, including `lookback_months < 2`, gives 0.
pub fn compute_trend(monthly_counts: &MonthlyCounts, lookback_months: usize) -> f64 {
    let buckets = valid_buckets(monthly_counts);
    let start = buckets.len().saturating_sub(lookback_months);
    let recent = &buckets[start..];

    if recent.len() < 2 {
        return 0.0;
    }

    let n = recent.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = recent.iter().map(|(_, c)| *c as f64).sum::<f64>() / n;

    let (num, den) = recent
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, (_, count))| {
            let dx = i as f64 - mean_x;
            (num + dx * (*count as f64 - mean_y), den + dx * dx)
        });

    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}
