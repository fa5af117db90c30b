use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::AppResult;
use crate::models::{CardId, Edge};
use crate::services::graph::CoOccurrenceGraph;
use crate::services::temporal_stats::{
    compute_consistency, compute_recency_score, compute_trend, RECENT_TREND_MONTHS,
};

use super::{rank, SimilaritySignal};

const RECENCY_WEIGHT: f64 = 0.4;
const CONSISTENCY_WEIGHT: f64 = 0.3;
const TREND_WEIGHT: f64 = 0.2;
const BASELINE: f64 = 0.1;

/// Scores graph neighbours by how recent, steady and growing their
/// co-occurrence with the query is
pub struct TemporalSignal {
    graph: Arc<CoOccurrenceGraph>,
    as_of: DateTime<Utc>,
    decay_days: f64,
    min_weight: i64,
}

impl TemporalSignal {
    pub fn new(graph: Arc<CoOccurrenceGraph>, as_of: DateTime<Utc>, decay_days: f64) -> Self {
        Self {
            graph,
            as_of,
            decay_days,
            min_weight: 1,
        }
    }

    /// Measures recency from the graph's most recent deck, or now for an
    /// empty graph
    pub fn from_graph(graph: Arc<CoOccurrenceGraph>, decay_days: f64) -> Self {
        let as_of = graph.last_update().unwrap_or_else(Utc::now);
        Self::new(graph, as_of, decay_days)
    }

    pub fn with_min_weight(mut self, min_weight: i64) -> Self {
        self.min_weight = min_weight;
        self
    }

    fn edge_score(&self, edge: &Edge) -> f64 {
        let recency = compute_recency_score(&edge.monthly_counts, self.as_of, self.decay_days);
        let consistency = compute_consistency(&edge.monthly_counts);
        // Slopes of about +/-5 decks per month saturate the trend term
        let trend = ((compute_trend(&edge.monthly_counts, RECENT_TREND_MONTHS) + 5.0) / 10.0)
            .clamp(0.0, 1.0);

        (recency * RECENCY_WEIGHT + consistency * CONSISTENCY_WEIGHT + trend * TREND_WEIGHT + BASELINE)
            .min(1.0)
    }
}

#[async_trait::async_trait]
impl SimilaritySignal for TemporalSignal {
    fn available(&self, card: &str) -> bool {
        !self.graph.get_neighbors(card, self.min_weight, None).is_empty()
    }

    async fn candidates(&self, card: &str, n: usize) -> AppResult<Vec<(CardId, f64)>> {
        let scored = self
            .graph
            .get_neighbors(card, self.min_weight, None)
            .into_iter()
            .filter_map(|other| {
                let score = self.edge_score(self.graph.edge(card, &other)?);
                Some((other, score))
            })
            .collect();

        Ok(rank(scored, n))
    }

    async fn pairwise(&self, a: &str, b: &str) -> AppResult<f64> {
        Ok(self
            .graph
            .edge(a, b)
            .filter(|e| e.weight >= self.min_weight)
            .map(|e| self.edge_score(e))
            .unwrap_or(0.0))
    }
}
