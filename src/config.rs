use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::WeightConfig;
use crate::services::fusion::{Aggregation, FusionConfig};

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Where the graph is persisted. `.db`, `.sqlite` and `.sqlite3` select SQLite.
    #[serde(default = "default_graph_path")]
    pub graph_path: PathBuf,

    /// Optional JSONL file of deck records to ingest on startup
    pub decks_path: Option<PathBuf>,

    /// Optional destination for a `card1\tcard2\tweight` edgelist export
    pub edgelist_path: Option<PathBuf>,

    /// Minimum edge weight used for adjacency and edgelist export
    #[serde(default = "default_min_edge_weight")]
    pub min_edge_weight: i64,

    /// Fusion weights, formatted as `name=weight,name=weight`
    #[serde(default = "default_fusion_weights")]
    pub fusion_weights: String,

    /// Multiplier applied to `top_k` when asking each signal for candidates
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,

    /// Upper bound for a single signal call
    #[serde(default = "default_signal_timeout_ms")]
    pub signal_timeout_ms: u64,

    /// Optional overall time budget for one `find_similar` call
    pub query_budget_ms: Option<u64>,

    /// `weighted`, `rrf[:k]`, `combsum`, `combmax` or `combmin`
    #[serde(default = "default_fusion_aggregation")]
    pub fusion_aggregation: String,

    /// Diversification strength, 0 disables it
    #[serde(default)]
    pub mmr_lambda: f64,

    /// Signal used to measure redundancy between results
    #[serde(default = "default_mmr_signal")]
    pub mmr_signal: String,

    /// Optional word2vec text file with precomputed card vectors
    pub embeddings_path: Option<PathBuf>,

    /// Optional JSON file mapping card name to functional tags
    pub tags_path: Option<PathBuf>,

    /// Decay constant for the temporal signal
    #[serde(default = "default_recency_decay_days")]
    pub recency_decay_days: f64,

    /// Optional card to query once the engine is built
    pub query_card: Option<String>,

    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_graph_path() -> PathBuf {
    PathBuf::from("data/graph.json")
}

fn default_min_edge_weight() -> i64 {
    1
}

fn default_fusion_weights() -> String {
    "jaccard=1.0".to_string()
}

fn default_overfetch_factor() -> usize {
    3
}

fn default_signal_timeout_ms() -> u64 {
    250
}

fn default_fusion_aggregation() -> String {
    "weighted".to_string()
}

fn default_mmr_signal() -> String {
    "jaccard".to_string()
}

fn default_recency_decay_days() -> f64 {
    365.0
}

fn default_top_k() -> usize {
    10
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }

    /// Parsed fusion weights
    pub fn weights(&self) -> anyhow::Result<WeightConfig> {
        self.fusion_weights
            .parse::<WeightConfig>()
            .map_err(|e| anyhow::anyhow!("Invalid FUSION_WEIGHTS: {}", e))
    }

    /// Fusion engine settings derived from this configuration
    pub fn fusion_config(&self) -> anyhow::Result<FusionConfig> {
        let aggregation = self
            .fusion_aggregation
            .parse::<Aggregation>()
            .map_err(|e| anyhow::anyhow!("Invalid FUSION_AGGREGATION: {}", e))?;

        Ok(FusionConfig {
            overfetch_factor: self.overfetch_factor.max(1),
            signal_timeout: Duration::from_millis(self.signal_timeout_ms),
            default_budget: self.query_budget_ms.map(Duration::from_millis),
            aggregation,
            mmr_lambda: self.mmr_lambda,
            mmr_signal: self.mmr_signal.clone(),
        })
    }
}
