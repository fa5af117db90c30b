//! Weighted late fusion over registered similarity signals.
//!
//! Per call: pick the registered signals that have a positive weight and are
//! available for the query, ask each for candidates under a timeout, then
//! combine the answers with weights renormalised over the signals that
//! actually answered. A signal that is unavailable, slow or failing only
//! removes itself from that one query.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{AppError, AppResult};
use crate::models::{CardId, ScoredCard, SimilarityQuery, WeightConfig};
use crate::services::signals::{SignalRegistry, SimilaritySignal};

/// How per-signal scores are combined
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Aggregation {
    /// `Σ w'_s * score_s(c)`
    #[default]
    Weighted,
    /// `Σ w'_s / (k + rank_s(c))`, rank starting at 1
    ReciprocalRank { k: f64 },
    /// Sum of the raw scores answering signals gave the candidate. Unweighted
    /// and not bounded by 1.
    CombSum,
    /// Best score any answering signal gave the candidate
    CombMax,
    /// Worst score among the signals that returned the candidate
    CombMin,
}

impl FromStr for Aggregation {
    type Err = AppError;

    /// `weighted`, `combsum`, `combmax`, `combmin`, `rrf` or `rrf:<k>` (k defaults to 60)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim().to_lowercase();
        match raw.split_once(':') {
            Some(("rrf", k)) => {
                let k: f64 = k
                    .trim()
                    .parse()
                    .map_err(|_| AppError::InvalidInput(format!("invalid rrf constant '{}'", k)))?;
                if !k.is_finite() || k < 0.0 {
                    return Err(AppError::InvalidInput(format!("rrf constant must be >= 0, got {}", k)));
                }
                Ok(Self::ReciprocalRank { k })
            }
            Some(_) => Err(AppError::InvalidInput(format!("unknown aggregation '{}'", s))),
            None => match raw.as_str() {
                "weighted" => Ok(Self::Weighted),
                "rrf" => Ok(Self::ReciprocalRank { k: DEFAULT_RRF_K }),
                "combsum" => Ok(Self::CombSum),
                "combmax" => Ok(Self::CombMax),
                "combmin" => Ok(Self::CombMin),
                _ => Err(AppError::InvalidInput(format!("unknown aggregation '{}'", s))),
            },
        }
    }
}

pub const DEFAULT_RRF_K: f64 = 60.0;

#[derive(Debug, Clone, PartialEq)]
pub struct FusionConfig {
    /// Each signal is asked for `overfetch_factor * top_k` candidates
    pub overfetch_factor: usize,
    /// Upper bound for one signal call
    pub signal_timeout: Duration,
    /// Budget for a whole query when the query does not carry its own
    pub default_budget: Option<Duration>,
    pub aggregation: Aggregation,
    /// Maximal marginal relevance trade-off in `[0, 1]`; 0 keeps the plain ranking
    pub mmr_lambda: f64,
    /// Signal whose pairwise score measures redundancy between results
    pub mmr_signal: String,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            overfetch_factor: 3,
            signal_timeout: Duration::from_millis(250),
            default_budget: None,
            aggregation: Aggregation::Weighted,
            mmr_lambda: 0.0,
            mmr_signal: "jaccard".to_string(),
        }
    }
}

/// One signal's contribution to a query
struct Answer<T> {
    weight: f64,
    value: T,
}

#[derive(Clone)]
pub struct FusionEngine {
    registry: SignalRegistry,
    weights: WeightConfig,
    config: FusionConfig,
}

impl FusionEngine {
    /// Creates an engine over `registry`.
    ///
    /// Weights for unregistered signals and registered signals without a
    /// weight are ignored with a warning. At least one registered signal must
    /// carry a positive weight.
    pub fn new(registry: SignalRegistry, weights: WeightConfig, config: FusionConfig) -> AppResult<Self> {
        for (name, _) in weights.iter() {
            if !registry.contains(name) {
                tracing::warn!(signal = %name, "Ignoring weight for unregistered signal");
            }
        }
        for name in registry.names() {
            if weights.get(name).is_none() {
                tracing::warn!(signal = %name, "Registered signal has no weight and will not be used");
            }
        }

        let usable = registry
            .names()
            .filter(|name| weights.get(name).unwrap_or(0.0) > 0.0)
            .count();
        if usable == 0 {
            return Err(AppError::InvalidInput(
                "no registered signal has a positive fusion weight".to_string(),
            ));
        }
        if config.overfetch_factor == 0 {
            return Err(AppError::InvalidInput("overfetch_factor must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&config.mmr_lambda) {
            return Err(AppError::InvalidInput(format!(
                "mmr_lambda must be within [0, 1], got {}",
                config.mmr_lambda
            )));
        }
        if config.mmr_lambda > 0.0 && !registry.contains(&config.mmr_signal) {
            tracing::warn!(signal = %config.mmr_signal, "Diversity signal is not registered, results will not be diversified");
        }

        tracing::info!(
            signals = registry.len(),
            usable,
            weights = %weights,
            "Fusion engine ready"
        );

        Ok(Self {
            registry,
            weights,
            config,
        })
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Ranked similar cards for `card`
    pub async fn find_similar(&self, card: &str, top_k: usize) -> AppResult<Vec<ScoredCard>> {
        let query = SimilarityQuery::new(card, top_k)?;
        self.find_similar_query(&query).await
    }

    pub async fn find_similar_query(&self, query: &SimilarityQuery) -> AppResult<Vec<ScoredCard>> {
        let fetch = query.top_k.saturating_mul(self.config.overfetch_factor);
        let deadline = self.deadline(query.budget);

        let mut fused = self.fused_scores(&query.card, fetch, deadline).await;
        fused.remove(&query.card);

        Ok(self.select(fused, query.top_k, deadline).await)
    }

    /// Ranked cards similar to all of `cards`, averaging fused scores.
    ///
    /// A candidate missing from one query's results counts as 0 for that
    /// query. None of the query cards appear in the output.
    pub async fn find_similar_multi(&self, cards: &[&str], top_k_count: usize) -> AppResult<Vec<ScoredCard>> {
        if top_k_count == 0 {
            return Err(AppError::InvalidInput("top_k must be greater than 0".to_string()));
        }
        let queries: BTreeSet<&str> = cards.iter().copied().collect();
        if queries.is_empty() {
            return Ok(Vec::new());
        }

        let fetch = (top_k_count + queries.len()).saturating_mul(self.config.overfetch_factor);
        let deadline = self.deadline(None);

        let mut totals: BTreeMap<CardId, f64> = BTreeMap::new();
        for card in &queries {
            for (candidate, score) in self.fused_scores(card, fetch, deadline).await {
                *totals.entry(candidate).or_insert(0.0) += score;
            }
        }

        let n = queries.len() as f64;
        let averaged = totals
            .into_iter()
            .filter(|(candidate, _)| !queries.contains(candidate.as_str()))
            .map(|(candidate, total)| (candidate, total / n))
            .collect();

        Ok(self.select(averaged, top_k_count, deadline).await)
    }

    /// Fused pairwise similarity of `a` and `b` in `[0, 1]`.
    ///
    /// Uses the weighted combination regardless of the configured
    /// aggregation; rank-based fusion has no pairwise meaning. Returns 0 when
    /// no signal answers.
    pub async fn similarity(&self, a: &str, b: &str) -> AppResult<f64> {
        let deadline = self.deadline(None);
        let active = self.active_signals(a);
        let mut answers = Vec::with_capacity(active.len());

        for (i, (name, weight, signal)) in active.iter().enumerate() {
            let Some(timeout) = self.call_timeout(deadline, active.len() - i) else {
                tracing::debug!(signal = %name, "Query budget exhausted, skipping remaining signals");
                break;
            };

            let signal = Arc::clone(signal);
            let (left, right) = (a.to_string(), b.to_string());
            let result = run_signal(name, timeout, async move { signal.pairwise(&left, &right).await }).await;

            match result {
                Ok(score) => answers.push(Answer {
                    weight: *weight,
                    value: score.clamp(0.0, 1.0),
                }),
                Err(e) => tracing::warn!(signal = %name, error = %e, "Signal unavailable for this query"),
            }
        }

        let Some(total) = total_weight(&answers) else {
            return Ok(0.0);
        };

        Ok(answers
            .iter()
            .map(|answer| answer.weight / total * answer.value)
            .sum::<f64>()
            .clamp(0.0, 1.0))
    }

    fn deadline(&self, budget: Option<Duration>) -> Option<Instant> {
        budget
            .or(self.config.default_budget)
            .map(|budget| Instant::now() + budget)
    }

    /// Timeout for the next call, `None` once the budget is spent
    fn call_timeout(&self, deadline: Option<Instant>, remaining_signals: usize) -> Option<Duration> {
        match deadline {
            None => Some(self.config.signal_timeout),
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return None;
                }
                let share = remaining / remaining_signals.max(1) as u32;
                Some(share.min(self.config.signal_timeout))
            }
        }
    }

    /// Registered signals with a positive weight that are available for `card`,
    /// in name order. A signal whose availability check panics is skipped.
    fn active_signals(&self, card: &str) -> Vec<(String, f64, Arc<dyn SimilaritySignal>)> {
        self.registry
            .iter()
            .filter_map(|(name, signal)| {
                let weight = self.weights.get(name).filter(|w| *w > 0.0)?;
                match std::panic::catch_unwind(AssertUnwindSafe(|| signal.available(card))) {
                    Ok(true) => Some((name.to_string(), weight, Arc::clone(signal))),
                    Ok(false) => None,
                    Err(payload) => {
                        let error = AppError::SignalCompute {
                            signal: name.to_string(),
                            message: format!("availability check panicked: {}", panic_message(&*payload)),
                        };
                        tracing::warn!(signal = %name, error = %error, "Signal unavailable for this query");
                        None
                    }
                }
            })
            .collect()
    }

    /// Final ordering: plain top `n`, or a greedy maximal-marginal-relevance
    /// pick when `mmr_lambda > 0`.
    ///
    /// Each MMR step takes the candidate maximising
    /// `score - lambda * max_sim(candidate, picked)`, where `max_sim` is the
    /// diversity signal's pairwise score. Reported scores stay the fused
    /// relevance scores, in pick order.
    async fn select(&self, scores: BTreeMap<CardId, f64>, n: usize, deadline: Option<Instant>) -> Vec<ScoredCard> {
        let lambda = self.config.mmr_lambda;
        if lambda <= 0.0 || scores.len() <= 1 {
            return top_k(scores, n);
        }
        let Some(diversity) = self.registry.get(&self.config.mmr_signal) else {
            return top_k(scores, n);
        };

        let mut remaining: Vec<(CardId, f64, f64)> = ranked(scores)
            .into_iter()
            .map(|(card, score)| (card, score, 0.0))
            .collect();
        let mut picked: Vec<ScoredCard> = Vec::with_capacity(n.min(remaining.len()));

        while picked.len() < n && !remaining.is_empty() {
            let best = remaining
                .iter()
                .enumerate()
                .fold(None::<(usize, f64)>, |best, (i, (_, score, max_sim))| {
                    let mmr = score - lambda * max_sim;
                    match best {
                        Some((_, best_mmr)) if best_mmr >= mmr => best,
                        _ => Some((i, mmr)),
                    }
                })
                .map(|(i, _)| i)
                .unwrap_or(0);

            let (card, score, _) = remaining.remove(best);

            if picked.len() + 1 < n {
                for (other, _, max_sim) in remaining.iter_mut() {
                    let sim = self.diversity_score(diversity, &card, other, deadline).await;
                    *max_sim = max_sim.max(sim);
                }
            }
            picked.push(ScoredCard::new(card, score));
        }

        picked
    }

    /// Pairwise redundancy of two results, 0 when the diversity signal fails
    async fn diversity_score(
        &self,
        signal: &Arc<dyn SimilaritySignal>,
        a: &str,
        b: &str,
        deadline: Option<Instant>,
    ) -> f64 {
        let Some(timeout) = self.call_timeout(deadline, 1) else {
            return 0.0;
        };
        let signal = Arc::clone(signal);
        let (left, right) = (a.to_string(), b.to_string());
        match run_signal(&self.config.mmr_signal, timeout, async move { signal.pairwise(&left, &right).await }).await {
            Ok(score) => score.clamp(0.0, 1.0),
            Err(e) => {
                tracing::debug!(error = %e, "Diversity score unavailable, treating as 0");
                0.0
            }
        }
    }

    /// Fused score of every candidate any answering signal returned for `card`
    async fn fused_scores(&self, card: &str, fetch: usize, deadline: Option<Instant>) -> BTreeMap<CardId, f64> {
        let active = self.active_signals(card);
        if active.is_empty() {
            tracing::debug!(card = %card, "No signal available for query");
            return BTreeMap::new();
        }

        let mut answers: Vec<Answer<Vec<(CardId, f64)>>> = Vec::with_capacity(active.len());

        for (i, (name, weight, signal)) in active.iter().enumerate() {
            let Some(timeout) = self.call_timeout(deadline, active.len() - i) else {
                tracing::debug!(signal = %name, "Query budget exhausted, skipping remaining signals");
                break;
            };

            let signal = Arc::clone(signal);
            let query = card.to_string();
            let result = run_signal(name, timeout, async move { signal.candidates(&query, fetch).await }).await;

            match result {
                Ok(candidates) => {
                    tracing::debug!(signal = %name, candidates = candidates.len(), "Signal answered");
                    answers.push(Answer {
                        weight: *weight,
                        value: candidates,
                    });
                }
                Err(e) => tracing::warn!(signal = %name, error = %e, "Signal unavailable for this query"),
            }
        }

        let Some(total) = total_weight(&answers) else {
            return BTreeMap::new();
        };

        self.aggregate(&answers, total)
    }

    fn aggregate(&self, answers: &[Answer<Vec<(CardId, f64)>>], total: f64) -> BTreeMap<CardId, f64> {
        let mut fused: BTreeMap<CardId, f64> = BTreeMap::new();

        match self.config.aggregation {
            Aggregation::Weighted => {
                for answer in answers {
                    let w = answer.weight / total;
                    for (candidate, score) in &answer.value {
                        *fused.entry(candidate.clone()).or_insert(0.0) += w * score.clamp(0.0, 1.0);
                    }
                }
            }
            Aggregation::ReciprocalRank { k } => {
                for answer in answers {
                    let w = answer.weight / total;
                    for (rank, (candidate, _)) in answer.value.iter().enumerate() {
                        *fused.entry(candidate.clone()).or_insert(0.0) += w / (k + rank as f64 + 1.0);
                    }
                }
            }
            Aggregation::CombSum => {
                for answer in answers {
                    for (candidate, score) in &answer.value {
                        *fused.entry(candidate.clone()).or_insert(0.0) += score.clamp(0.0, 1.0);
                    }
                }
            }
            Aggregation::CombMax => {
                for answer in answers {
                    for (candidate, score) in &answer.value {
                        let entry = fused.entry(candidate.clone()).or_insert(0.0);
                        *entry = entry.max(score.clamp(0.0, 1.0));
                    }
                }
            }
            Aggregation::CombMin => {
                for answer in answers {
                    for (candidate, score) in &answer.value {
                        let score = score.clamp(0.0, 1.0);
                        fused
                            .entry(candidate.clone())
                            .and_modify(|min| *min = min.min(score))
                            .or_insert(score);
                    }
                }
            }
        }

        fused
    }
}

/// Sum of answering weights, `None` when nothing usable answered
fn total_weight<T>(answers: &[Answer<T>]) -> Option<f64> {
    let total: f64 = answers.iter().map(|answer| answer.weight).sum();
    (total > 0.0).then_some(total)
}

/// Score descending, then name ascending
fn ranked(scores: BTreeMap<CardId, f64>) -> Vec<(CardId, f64)> {
    let mut ranked: Vec<(CardId, f64)> = scores.into_iter().collect();
    ranked.sort_by(|(a_card, a_score), (b_card, b_score)| {
        b_score.total_cmp(a_score).then_with(|| a_card.cmp(b_card))
    });
    ranked
}

/// First `n` of [`ranked`]
fn top_k(scores: BTreeMap<CardId, f64>, n: usize) -> Vec<ScoredCard> {
    ranked(scores)
        .into_iter()
        .take(n)
        .map(|(card, score)| ScoredCard::new(card, score))
        .collect()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Runs one signal call on its own task under `timeout`.
///
/// Elapsed timeouts and panics become signal-local errors, and the task is
/// aborted if it outlives its timeout.
async fn run_signal<T, F>(name: &str, timeout: Duration, call: F) -> AppResult<T>
where
    T: Send + 'static,
    F: Future<Output = AppResult<T>> + Send + 'static,
{
    let mut handle = tokio::spawn(call);

    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(e))) if e.is_signal_local() => Err(e),
        Ok(Ok(Err(e))) => Err(AppError::SignalCompute {
            signal: name.to_string(),
            message: e.to_string(),
        }),
        Ok(Err(join_error)) => Err(AppError::SignalCompute {
            signal: name.to_string(),
            message: join_error.to_string(),
        }),
        Err(_) => {
            handle.abort();
            Err(AppError::SignalTimeout {
                signal: name.to_string(),
                timeout_ms: timeout.as_millis(),
            })
        }
    }
}
