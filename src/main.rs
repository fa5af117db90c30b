use anyhow::Context;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cardgraph::config::Config;
use cardgraph::db;
use cardgraph::models::WeightConfig;
use cardgraph::services::signals::{
    EmbeddingSignal, FunctionalTagSignal, GraphJaccardSignal, InMemoryVectorIndex, SignalRegistry,
    TemporalSignal,
};
use cardgraph::services::{CoOccurrenceGraph, FusionEngine, SharedGraph};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cardgraph=info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let weights = config.weights()?;

    let graph = if tokio::fs::try_exists(&config.graph_path).await? {
        db::load_graph(&config.graph_path)
            .await
            .with_context(|| format!("Failed to load graph from {}", config.graph_path.display()))?
    } else {
        tracing::info!(path = %config.graph_path.display(), "No saved graph, starting empty");
        CoOccurrenceGraph::new()
    };
    let shared = SharedGraph::new(graph);

    if let Some(decks_path) = &config.decks_path {
        let file = tokio::fs::File::open(decks_path)
            .await
            .with_context(|| format!("Failed to open {}", decks_path.display()))?;
        let report = shared.ingest_jsonl(BufReader::new(file)).await?;

        if report.ingested > 0 {
            let snapshot = shared.publish().await;
            db::save_graph(&snapshot, &config.graph_path).await?;
        }
    }

    let graph = shared.publish().await;
    let stats = graph.statistics();
    tracing::info!(
        nodes = stats.num_nodes,
        edges = stats.num_edges,
        decks = stats.total_decks_processed,
        avg_degree = stats.avg_degree,
        max_edge_weight = stats.max_edge_weight,
        games = ?stats.game_distribution,
        "Graph ready"
    );

    if let Some(edgelist_path) = &config.edgelist_path {
        graph.export_edgelist(edgelist_path, config.min_edge_weight).await?;
    }

    let registry = build_registry(&config, &weights, graph).await?;
    let engine = FusionEngine::new(registry, weights, config.fusion_config()?)?;

    if let Some(card) = &config.query_card {
        let results = engine.find_similar(card, config.top_k).await?;
        if results.is_empty() {
            tracing::info!(card = %card, "No similar cards found");
        }
        for (rank, result) in results.iter().enumerate() {
            tracing::info!(rank = rank + 1, card = %result.card, score = result.score, "Similar card");
        }
    }

    Ok(())
}

/// Builds the signals the weights ask for. Graph-backed signals share the
/// published snapshot; file-backed signals need their path configured.
async fn build_registry(
    config: &Config,
    weights: &WeightConfig,
    graph: Arc<CoOccurrenceGraph>,
) -> anyhow::Result<SignalRegistry> {
    let mut registry = SignalRegistry::new();

    if weights.get("jaccard").is_some() {
        registry.register(
            "jaccard",
            Arc::new(GraphJaccardSignal::from_graph(&graph, config.min_edge_weight)),
        )?;
    }

    if weights.get("temporal").is_some() {
        let signal = TemporalSignal::from_graph(graph.clone(), config.recency_decay_days)
            .with_min_weight(config.min_edge_weight);
        registry.register("temporal", Arc::new(signal))?;
    }

    if let Some(path) = &config.embeddings_path {
        let index = InMemoryVectorIndex::load(path)
            .await
            .with_context(|| format!("Failed to load embeddings from {}", path.display()))?;
        registry.register("embedding", Arc::new(EmbeddingSignal::new(Arc::new(index))))?;
    }

    if let Some(path) = &config.tags_path {
        let signal = FunctionalTagSignal::load(path)
            .await
            .with_context(|| format!("Failed to load tags from {}", path.display()))?;
        registry.register("tags", Arc::new(signal))?;
    }

    Ok(registry)
}
