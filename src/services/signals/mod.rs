//! Pluggable similarity signals
//!
//! Every signal ranks cards against a query card with scores in `[0, 1]`.
//! Signals are built by the composition root and handed to the fusion engine
//! through a [`SignalRegistry`]; a signal that is not configured is simply
//! not registered.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::models::CardId;

pub mod embedding;
pub mod functional_tags;
pub mod jaccard;
pub mod temporal;

pub use embedding::{EmbeddingSignal, InMemoryVectorIndex, VectorIndex};
pub use functional_tags::FunctionalTagSignal;
pub use jaccard::GraphJaccardSignal;
pub use temporal::TemporalSignal;

/// Candidate window used when a signal derives a pairwise score from its
/// own ranking
pub const PAIRWISE_WINDOW: usize = 100;

/// Source of ranked or pairwise card similarity
///
/// Implementations must not fail on an unknown query card: `available`
/// returns false and `candidates` returns an empty list instead.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SimilaritySignal: Send + Sync {
    /// Whether this signal can say anything about `card`
    fn available(&self, card: &str) -> bool;

    /// Up to `n` cards most similar to `card`, best first, scores in `[0, 1]`
    async fn candidates(&self, card: &str, n: usize) -> AppResult<Vec<(CardId, f64)>>;

    /// Similarity of `a` and `b` in `[0, 1]`
    ///
    /// Default implementation looks `b` up in `candidates(a, PAIRWISE_WINDOW)`
    /// and reports 0 when it falls outside that window. Signals with a cheap
    /// exact score override this.
    async fn pairwise(&self, a: &str, b: &str) -> AppResult<f64> {
        let ranked = self.candidates(a, PAIRWISE_WINDOW).await?;
        Ok(ranked
            .into_iter()
            .find(|(card, _)| card == b)
            .map(|(_, score)| score)
            .unwrap_or(0.0))
    }
}

/// Named set of signals, iterated in name order
#[derive(Clone, Default)]
pub struct SignalRegistry {
    signals: BTreeMap<String, Arc<dyn SimilaritySignal>>,
}

impl SignalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a signal under a unique, non-empty name
    pub fn register(
        &mut self,
        name: impl Into<String>,
        signal: Arc<dyn SimilaritySignal>,
    ) -> AppResult<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(AppError::InvalidInput("signal name must not be empty".to_string()));
        }
        if self.signals.contains_key(&name) {
            return Err(AppError::InvalidInput(format!(
                "signal '{}' is already registered",
                name
            )));
        }
        tracing::debug!(signal = %name, "Registered similarity signal");
        self.signals.insert(name, signal);
        Ok(())
    }

    pub fn with(mut self, name: impl Into<String>, signal: Arc<dyn SimilaritySignal>) -> AppResult<Self> {
        self.register(name, signal)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn SimilaritySignal>> {
        self.signals.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.signals.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.signals.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn SimilaritySignal>)> {
        self.signals.iter().map(|(name, signal)| (name.as_str(), signal))
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}

/// `|a ∩ b| / |a ∪ b|`, 0 when both sets are empty
pub fn jaccard<T: Eq + std::hash::Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Sorts by score descending, then name ascending, and keeps the first `n`
pub(crate) fn rank(mut scored: Vec<(CardId, f64)>, n: usize) -> Vec<(CardId, f64)> {
    scored.sort_by(|(a_card, a_score), (b_card, b_score)| {
        b_score.total_cmp(a_score).then_with(|| a_card.cmp(b_card))
    });
    scored.truncate(n);
    scored
}

/// Cards reachable in one or two hops, excluding `card` itself
pub(crate) fn two_hop<'a, F>(card: &str, neighbors: F) -> BTreeSet<&'a str>
where
    F: Fn(&str) -> Option<&'a HashSet<CardId>>,
{
    let mut reachable = BTreeSet::new();
    if let Some(first) = neighbors(card) {
        for hop in first {
            reachable.insert(hop.as_str());
            if let Some(second) = neighbors(hop) {
                reachable.extend(second.iter().map(String::as_str));
            }
        }
    }
    reachable.remove(card);
    reachable
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_jaccard() {
        assert_eq!(jaccard(&set(&["a", "b"]), &set(&["a", "b"])), 1.0);
        assert_eq!(jaccard(&set(&["a"]), &set(&["b"])), 0.0);
        assert!((jaccard(&set(&["a", "b", "c"]), &set(&["b", "c", "d"])) - 0.5).abs() < 1e-12);
        assert_eq!(jaccard(&set(&[]), &set(&[])), 0.0);
    }

    #[test]
    fn test_rank_orders_by_score_then_name() {
        let ranked = rank(
            vec![
                ("c".to_string(), 0.5),
                ("b".to_string(), 0.9),
                ("a".to_string(), 0.5),
            ],
            2,
        );
        assert_eq!(ranked, vec![("b".to_string(), 0.9), ("a".to_string(), 0.5)]);
    }

    #[test]
    fn test_registry_rejects_duplicates_and_orders_names() {
        let mut registry = SignalRegistry::new();
        registry
            .register("tags", Arc::new(MockSimilaritySignal::new()))
            .unwrap();
        registry
            .register("jaccard", Arc::new(MockSimilaritySignal::new()))
            .unwrap();

        let duplicate = registry.register("tags", Arc::new(MockSimilaritySignal::new()));
        assert!(matches!(duplicate, Err(AppError::InvalidInput(_))));
        assert!(registry.register(" ", Arc::new(MockSimilaritySignal::new())).is_err());

        let names: Vec<_> = registry.names().collect();
        assert_eq!(names, vec!["jaccard", "tags"]);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_default_pairwise_uses_candidate_window() {
        let mut signal = MockSimilaritySignal::new();
        signal
            .expect_candidates()
            .returning(|_, _| Ok(vec![("Shock".to_string(), 0.8)]));

        // The mock replaces `pairwise` too, so reach the default through a wrapper
        struct Windowed(MockSimilaritySignal);

        #[async_trait::async_trait]
        impl SimilaritySignal for Windowed {
            fn available(&self, _card: &str) -> bool {
                true
            }
            async fn candidates(&self, card: &str, n: usize) -> AppResult<Vec<(CardId, f64)>> {
                self.0.candidates(card, n).await
            }
        }

        let windowed = Windowed(signal);
        assert_eq!(windowed.pairwise("Bolt", "Shock").await.unwrap(), 0.8);
        assert_eq!(windowed.pairwise("Bolt", "Island").await.unwrap(), 0.0);
    }
}
