use std::sync::Arc;

use crate::error::AppResult;
use crate::models::CardId;
use crate::services::graph::{Adjacency, CoOccurrenceGraph};

use super::{jaccard, rank, two_hop, SimilaritySignal};

/// Neighbourhood overlap on the co-occurrence graph.
///
/// `score(a, b) = |N(a) ∩ N(b)| / |N(a) ∪ N(b)|`. Candidates are the cards
/// within two hops of the query, since any card sharing a neighbour is at
/// most two hops away.
pub struct GraphJaccardSignal {
    adjacency: Arc<Adjacency>,
}

impl GraphJaccardSignal {
    pub fn new(adjacency: Adjacency) -> Self {
        Self {
            adjacency: Arc::new(adjacency),
        }
    }

    /// Builds the signal from a graph snapshot, ignoring edges below `min_weight`
    pub fn from_graph(graph: &CoOccurrenceGraph, min_weight: i64) -> Self {
        Self::new(graph.to_adjacency_dict(min_weight))
    }

    fn score(&self, a: &str, b: &str) -> f64 {
        match (self.adjacency.get(a), self.adjacency.get(b)) {
            (Some(na), Some(nb)) => jaccard(na, nb),
            _ => 0.0,
        }
    }
}

#[async_trait::async_trait]
impl SimilaritySignal for GraphJaccardSignal {
    fn available(&self, card: &str) -> bool {
        self.adjacency
            .get(card)
            .map(|neighbors| !neighbors.is_empty())
            .unwrap_or(false)
    }

    async fn candidates(&self, card: &str, n: usize) -> AppResult<Vec<(CardId, f64)>> {
        if !self.available(card) {
            return Ok(Vec::new());
        }

        let scored = two_hop(card, |c| self.adjacency.get(c))
            .into_iter()
            .map(|other| (other.to_string(), self.score(card, other)))
            .filter(|(_, score)| *score > 0.0)
            .collect();

        Ok(rank(scored, n))
    }

    async fn pairwise(&self, a: &str, b: &str) -> AppResult<f64> {
        Ok(self.score(a, b))
    }
}
