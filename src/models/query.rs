use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, AppResult};

use super::CardId;

/// One similarity lookup
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityQuery {
    pub card: CardId,
    pub top_k: usize,
    /// Overall time budget for the lookup; falls back to the engine default
    pub budget: Option<Duration>,
}

impl SimilarityQuery {
    pub fn new(card: impl Into<CardId>, top_k: usize) -> AppResult<Self> {
        let card = card.into();
        if top_k == 0 {
            return Err(AppError::InvalidInput("top_k must be greater than 0".to_string()));
        }
        Ok(Self {
            card,
            top_k,
            budget: None,
        })
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }
}

/// A ranked result entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCard {
    pub card: CardId,
    pub score: f64,
}

impl ScoredCard {
    pub fn new(card: impl Into<CardId>, score: f64) -> Self {
        Self {
            card: card.into(),
            score,
        }
    }
}

/// Configured fusion weight per signal name.
///
/// Weights are non-negative and finite. They do not have to sum to 1; the
/// engine renormalizes over whichever signals are available for a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightConfig {
    weights: BTreeMap<String, f64>,
}

impl WeightConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a weight
    pub fn with(mut self, signal: impl Into<String>, weight: f64) -> AppResult<Self> {
        self.set(signal, weight)?;
        Ok(self)
    }

    pub fn set(&mut self, signal: impl Into<String>, weight: f64) -> AppResult<()> {
        let signal = signal.into();
        if signal.trim().is_empty() {
            return Err(AppError::InvalidInput("signal name must not be empty".to_string()));
        }
        if !weight.is_finite() || weight < 0.0 {
            return Err(AppError::InvalidInput(format!(
                "weight for '{}' must be a finite number >= 0, got {}",
                signal, weight
            )));
        }
        self.weights.insert(signal, weight);
        Ok(())
    }

    pub fn get(&self, signal: &str) -> Option<f64> {
        self.weights.get(signal).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.weights.iter().map(|(name, w)| (name.as_str(), *w))
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

impl FromStr for WeightConfig {
    type Err = AppError;

    /// Parses `name=weight,name=weight`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut config = WeightConfig::new();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, weight) = entry
                .split_once('=')
                .ok_or_else(|| AppError::Parse(format!("expected name=weight, got '{}'", entry)))?;
            let weight: f64 = weight
                .trim()
                .parse()
                .map_err(|_| AppError::Parse(format!("invalid weight in '{}'", entry)))?;
            config.set(name.trim(), weight)?;
        }
        Ok(config)
    }
}

impl Display for WeightConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .weights
            .iter()
            .map(|(name, w)| format!("{}={}", name, w))
            .collect();
        write!(f, "{}", parts.join(","))
    }
}
