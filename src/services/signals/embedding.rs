use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::models::CardId;

use super::{rank, SimilaritySignal};

/// Precomputed card vectors, possibly served by a remote index
#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
    fn contains(&self, card: &str) -> bool;

    /// Up to `n` nearest cards by raw cosine similarity in `[-1, 1]`,
    /// excluding `card` itself
    async fn most_similar(&self, card: &str, n: usize) -> AppResult<Vec<(CardId, f64)>>;

    /// Raw cosine similarity, `None` if either card has no vector
    async fn cosine(&self, a: &str, b: &str) -> AppResult<Option<f64>>;
}

/// Maps cosine similarity from `[-1, 1]` onto `[0, 1]`
pub fn cosine_to_unit(cosine: f64) -> f64 {
    ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Vectors held in memory, L2-normalised at load time
#[derive(Debug, Clone, Default)]
pub struct InMemoryVectorIndex {
    vectors: HashMap<CardId, Vec<f32>>,
    dim: usize,
}

impl InMemoryVectorIndex {
    /// Builds an index from raw vectors; all vectors must share one dimension
    pub fn new(vectors: impl IntoIterator<Item = (CardId, Vec<f32>)>) -> AppResult<Self> {
        let mut index = Self::default();
        for (card, vector) in vectors {
            index.insert(card, vector)?;
        }
        Ok(index)
    }

    fn insert(&mut self, card: CardId, mut vector: Vec<f32>) -> AppResult<()> {
        if vector.is_empty() {
            return Err(AppError::InvalidInput(format!("empty vector for '{}'", card)));
        }
        if self.dim == 0 {
            self.dim = vector.len();
        } else if vector.len() != self.dim {
            return Err(AppError::InvalidInput(format!(
                "vector for '{}' has dimension {}, expected {}",
                card,
                vector.len(),
                self.dim
            )));
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        self.vectors.insert(card, vector);
        Ok(())
    }

    /// Parses word2vec text format.
    ///
    /// An optional `count dim` header fixes the dimension; otherwise it is
    /// inferred from the first row. The last `dim` tokens of each row are the
    /// vector and everything before them is the card name, so names may
    /// contain spaces.
    pub fn from_word2vec_text(text: &str) -> AppResult<Self> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty()).peekable();
        let mut dim = parse_header(lines.peek().copied());
        if dim.is_some() {
            lines.next();
        }

        let mut index = Self::default();
        for (row, line) in lines.enumerate() {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let width = match dim {
                Some(d) => d,
                None => {
                    let inferred = tokens
                        .iter()
                        .rev()
                        .take_while(|t| t.parse::<f32>().is_ok())
                        .count()
                        .min(tokens.len().saturating_sub(1));
                    dim = Some(inferred);
                    inferred
                }
            };

            if width == 0 || tokens.len() <= width {
                return Err(AppError::Parse(format!("row {}: expected a name and {} values", row + 1, width)));
            }

            let split = tokens.len() - width;
            let name = tokens[..split].join(" ");
            let vector = tokens[split..]
                .iter()
                .map(|t| t.parse::<f32>())
                .collect::<Result<Vec<f32>, _>>()
                .map_err(|e| AppError::Parse(format!("row {}: {}", row + 1, e)))?;

            index.insert(name, vector)?;
        }

        Ok(index)
    }

    /// Loads a word2vec text file
    pub async fn load(path: &Path) -> AppResult<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        let index = Self::from_word2vec_text(&text)?;
        tracing::info!(path = %path.display(), vectors = index.len(), dim = index.dim, "Loaded card vectors");
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    fn dot(a: &[f32], b: &[f32]) -> f64 {
        a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum()
    }
}

fn parse_header(line: Option<&str>) -> Option<usize> {
    let tokens: Vec<&str> = line?.split_whitespace().collect();
    match tokens.as_slice() {
        [count, dim] => {
            count.parse::<usize>().ok()?;
            dim.parse::<usize>().ok()
        }
        _ => None,
    }
}

#[async_trait::async_trait]
impl VectorIndex for InMemoryVectorIndex {
    fn contains(&self, card: &str) -> bool {
        self.vectors.contains_key(card)
    }

    async fn most_similar(&self, card: &str, n: usize) -> AppResult<Vec<(CardId, f64)>> {
        let Some(query) = self.vectors.get(card) else {
            return Ok(Vec::new());
        };

        let scored = self
            .vectors
            .iter()
            .filter(|(other, _)| other.as_str() != card)
            .map(|(other, vector)| (other.clone(), Self::dot(query, vector)))
            .collect();

        Ok(rank(scored, n))
    }

    async fn cosine(&self, a: &str, b: &str) -> AppResult<Option<f64>> {
        Ok(match (self.vectors.get(a), self.vectors.get(b)) {
            (Some(va), Some(vb)) => Some(Self::dot(va, vb)),
            _ => None,
        })
    }
}

/// Cosine similarity over precomputed card embeddings
pub struct EmbeddingSignal {
    index: Arc<dyn VectorIndex>,
}

impl EmbeddingSignal {
    pub fn new(index: Arc<dyn VectorIndex>) -> Self {
        Self { index }
    }
}

#[async_trait::async_trait]
impl SimilaritySignal for EmbeddingSignal {
    fn available(&self, card: &str) -> bool {
        self.index.contains(card)
    }

    async fn candidates(&self, card: &str, n: usize) -> AppResult<Vec<(CardId, f64)>> {
        if !self.available(card) {
            return Ok(Vec::new());
        }

        let scored = self
            .index
            .most_similar(card, n)
            .await?
            .into_iter()
            .map(|(other, cosine)| (other, cosine_to_unit(cosine)))
            .collect();

        Ok(rank(scored, n))
    }

    async fn pairwise(&self, a: &str, b: &str) -> AppResult<f64> {
        Ok(self.index.cosine(a, b).await?.map(cosine_to_unit).unwrap_or(0.0))
    }
}
