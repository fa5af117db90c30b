use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

use cardgraph::db;
use cardgraph::models::{ScoredCard, WeightConfig};
use cardgraph::services::signals::{FunctionalTagSignal, GraphJaccardSignal, SignalRegistry, TemporalSignal};
use cardgraph::services::{ingest_jsonl, CoOccurrenceGraph, FusionConfig, FusionEngine, SharedGraph};

fn deck_line(cards: &[&str], timestamp: &str) -> String {
    let cards: Vec<_> = cards.iter().map(|name| json!({ "name": name, "count": 4 })).collect();
    json!({ "cards": cards, "timestamp": timestamp, "format": "Modern", "game": "magic" }).to_string()
}

fn burn_decks() -> String {
    [
        deck_line(&["Lightning Bolt", "Shock", "Mountain"], "2024-01-15T00:00:00Z"),
        deck_line(&["Chain Lightning", "Shock", "Mountain"], "2024-01-20T00:00:00Z"),
        deck_line(&["Lightning Bolt", "Shock"], "2024-02-03T00:00:00Z"),
        "{ this is not a deck }".to_string(),
        deck_line(&["Counterspell", "Island"], "2024-02-10T00:00:00Z"),
    ]
    .join("\n")
}

async fn ingested_graph() -> CoOccurrenceGraph {
    let mut graph = CoOccurrenceGraph::new();
    let decks = burn_decks();
    let report = ingest_jsonl(&mut graph, decks.as_bytes()).await.unwrap();
    assert_eq!(report.ingested, 4);
    assert_eq!(report.skipped, 1);
    graph
}

#[tokio::test]
async fn test_ingest_persist_reload_json_and_sqlite() {
    let graph = ingested_graph().await;
    let dir = tempfile::tempdir().unwrap();

    for file in ["graph.json", "graph.db"] {
        let path = dir.path().join(file);
        db::save_graph(&graph, &path).await.unwrap();
        let restored = db::load_graph(&path).await.unwrap();

        assert_eq!(restored, graph, "round trip through {}", file);
        let edge = restored.edge("Shock", "Lightning Bolt").unwrap();
        assert_eq!(edge.weight, 2);
        assert_eq!(edge.format_periods["Modern_2024"].values().sum::<i64>(), 2);
    }
}

#[tokio::test]
async fn test_fusion_over_reloaded_graph() {
    let graph = ingested_graph().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.json");
    db::save_graph(&graph, &path).await.unwrap();
    let graph = Arc::new(db::load_graph(&path).await.unwrap());

    let tags = FunctionalTagSignal::from_json(
        r#"{"Lightning Bolt": ["burn", "removal"], "Chain Lightning": ["burn", "removal"], "Shock": ["burn"]}"#,
    )
    .unwrap();

    let registry = SignalRegistry::new()
        .with("jaccard", Arc::new(GraphJaccardSignal::from_graph(&graph, 1)))
        .unwrap()
        .with("tags", Arc::new(tags))
        .unwrap()
        .with("temporal", Arc::new(TemporalSignal::from_graph(graph.clone(), 365.0)))
        .unwrap();
    let weights: WeightConfig = "jaccard=0.5,tags=0.3,temporal=0.2".parse().unwrap();
    let engine = FusionEngine::new(registry, weights, FusionConfig::default()).unwrap();

    let results = engine.find_similar("Lightning Bolt", 3).await.unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].card, "Chain Lightning");
    assert!(results.iter().all(|r| r.card != "Lightning Bolt"));
    assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.score)));
    assert_eq!(results, engine.find_similar("Lightning Bolt", 3).await.unwrap());

    // No tags for Island, so the graph signals share the whole weight
    let island = engine.find_similar("Island", 3).await.unwrap();
    assert_eq!(island.first().map(|r| r.card.as_str()), Some("Counterspell"));

    assert!(engine.find_similar("Black Lotus", 3).await.unwrap().is_empty());

    let pair = engine.similarity("Lightning Bolt", "Chain Lightning").await.unwrap();
    assert!(pair > 0.5 && pair <= 1.0);
}

#[tokio::test]
async fn test_jaccard_only_engine_scores_identical_neighbourhoods_as_one() {
    let decks = [
        deck_line(&["Bolt", "Shock", "Mountain"], "2024-01-01"),
        deck_line(&["Chain", "Shock", "Mountain"], "2024-01-02"),
    ]
    .join("\n");
    let mut graph = CoOccurrenceGraph::new();
    ingest_jsonl(&mut graph, decks.as_bytes()).await.unwrap();

    let registry = SignalRegistry::new()
        .with("jaccard", Arc::new(GraphJaccardSignal::from_graph(&graph, 1)))
        .unwrap();
    let weights = WeightConfig::new().with("jaccard", 1.0).unwrap();
    let engine = FusionEngine::new(registry, weights, FusionConfig::default()).unwrap();

    assert_eq!(engine.similarity("Bolt", "Chain").await.unwrap(), 1.0);
    assert_eq!(
        engine.find_similar("Bolt", 1).await.unwrap(),
        vec![ScoredCard::new("Chain", 1.0)]
    );
}

#[tokio::test]
async fn test_temporal_split_over_hundred_decks() {
    let shared = SharedGraph::default();
    let decks: Vec<String> = (0..100)
        .map(|i| {
            let day = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i);
            let (a, b) = (format!("Card {:03}", i), format!("Card {:03}", i + 1));
            deck_line(&[a.as_str(), b.as_str()], &day.to_string())
        })
        .collect();
    let report = shared.ingest_jsonl(decks.join("\n").as_bytes()).await.unwrap();
    assert_eq!(report.ingested, 100);

    let graph = shared.publish().await;
    let (train, val, test) = graph.split_temporal(0.7, 0.15).unwrap();
    assert_eq!((train.edge_count(), val.edge_count(), test.edge_count()), (70, 15, 15));

    let first_seventy: BTreeSet<(String, String)> = (0..70)
        .map(|i| (format!("Card {:03}", i), format!("Card {:03}", i + 1)))
        .collect();
    let train_edges: BTreeSet<(String, String)> = train
        .edges()
        .map(|e| (e.card_a.clone(), e.card_b.clone()))
        .collect();
    assert_eq!(train_edges, first_seventy);

    for edge in test.edges() {
        assert!(!train.get_neighbors(&edge.card_a, 1, None).contains(&edge.card_b));
        assert!(!val.get_neighbors(&edge.card_a, 1, None).contains(&edge.card_b));
    }
}

#[tokio::test]
async fn test_edgelist_export_matches_graph() {
    let graph = ingested_graph().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("edges.tsv");

    let written = graph.export_edgelist(&path, 2).await.unwrap();
    assert_eq!(written, 2);
    assert_eq!(
        tokio::fs::read_to_string(&path).await.unwrap(),
        "Lightning Bolt\tShock\t2\nMountain\tShock\t2\n"
    );
}
