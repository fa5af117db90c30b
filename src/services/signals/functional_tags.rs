use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use crate::error::{AppError, AppResult};
use crate::models::CardId;

use super::{jaccard, rank, SimilaritySignal};

/// Jaccard overlap of externally supplied functional tags
/// (`removal`, `card_draw`, `ramp`, ...)
#[derive(Debug, Default)]
pub struct FunctionalTagSignal {
    tags: HashMap<CardId, HashSet<String>>,
    /// tag -> cards carrying it
    by_tag: HashMap<String, BTreeSet<CardId>>,
}

impl FunctionalTagSignal {
    pub fn new(tags: HashMap<CardId, HashSet<String>>) -> Self {
        let tags: HashMap<CardId, HashSet<String>> =
            tags.into_iter().filter(|(_, t)| !t.is_empty()).collect();

        let mut by_tag: HashMap<String, BTreeSet<CardId>> = HashMap::new();
        for (card, card_tags) in &tags {
            for tag in card_tags {
                by_tag.entry(tag.clone()).or_default().insert(card.clone());
            }
        }

        Self { tags, by_tag }
    }

    /// Parses `{"card": ["tag", ...], ...}`
    pub fn from_json(json: &str) -> AppResult<Self> {
        let raw: HashMap<CardId, Vec<String>> = serde_json::from_str(json)
            .map_err(|e| AppError::Parse(format!("invalid tag file: {}", e)))?;

        Ok(Self::new(
            raw.into_iter()
                .map(|(card, tags)| {
                    let tags = tags
                        .into_iter()
                        .map(|t| t.trim().to_string())
                        .filter(|t| !t.is_empty())
                        .collect();
                    (card, tags)
                })
                .collect(),
        ))
    }

    pub async fn load(path: &Path) -> AppResult<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        let signal = Self::from_json(&json)?;
        tracing::info!(path = %path.display(), cards = signal.tags.len(), tags = signal.by_tag.len(), "Loaded functional tags");
        Ok(signal)
    }

    fn score(&self, a: &str, b: &str) -> f64 {
        match (self.tags.get(a), self.tags.get(b)) {
            (Some(ta), Some(tb)) => jaccard(ta, tb),
            _ => 0.0,
        }
    }
}

#[async_trait::async_trait]
impl SimilaritySignal for FunctionalTagSignal {
    fn available(&self, card: &str) -> bool {
        self.tags.contains_key(card)
    }

    async fn candidates(&self, card: &str, n: usize) -> AppResult<Vec<(CardId, f64)>> {
        let Some(query_tags) = self.tags.get(card) else {
            return Ok(Vec::new());
        };

        let sharing: BTreeSet<&CardId> = query_tags
            .iter()
            .filter_map(|tag| self.by_tag.get(tag))
            .flatten()
            .filter(|other| other.as_str() != card)
            .collect();

        let scored = sharing
            .into_iter()
            .map(|other| (other.clone(), self.score(card, other)))
            .collect();

        Ok(rank(scored, n))
    }

    async fn pairwise(&self, a: &str, b: &str) -> AppResult<f64> {
        Ok(self.score(a, b))
    }
}
