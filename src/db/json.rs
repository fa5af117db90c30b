use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{AppError, AppResult};
use crate::models::{parse_timestamp, CardNode, Edge, MonthlyCounts};
use crate::services::graph::CoOccurrenceGraph;

use super::write_atomic;

/// Separates the two card names in an edge key
const KEY_SEPARATOR: char = '\u{0001}';

#[derive(Debug, Serialize, Deserialize)]
struct GraphFile {
    nodes: Vec<String>,
    edges: BTreeMap<String, EdgeRecord>,
    /// Per-card game and activity, keyed by node name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    node_metadata: BTreeMap<String, CardNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    total_decks_processed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_update: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EdgeRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    game: Option<String>,
    weight: i64,
    first_seen: String,
    last_seen: String,
    #[serde(default)]
    monthly_counts: MonthlyCounts,
    #[serde(default)]
    format_periods: BTreeMap<String, MonthlyCounts>,
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn read_timestamp(raw: &str, what: &str) -> AppResult<DateTime<Utc>> {
    parse_timestamp(raw).map_err(|e| AppError::Persistence(format!("{}: {}", what, e)))
}

/// Serialises a graph to its JSON document
pub fn to_json(graph: &CoOccurrenceGraph) -> AppResult<String> {
    let edges = graph
        .sorted_edges()
        .into_iter()
        .map(|edge| {
            let key = format!("{}{}{}", edge.card_a, KEY_SEPARATOR, edge.card_b);
            let record = EdgeRecord {
                game: edge.game.clone(),
                weight: edge.weight,
                first_seen: format_timestamp(&edge.first_seen),
                last_seen: format_timestamp(&edge.last_seen),
                monthly_counts: edge.monthly_counts.clone(),
                format_periods: edge.format_periods.clone(),
            };
            (key, record)
        })
        .collect();

    let file = GraphFile {
        nodes: graph.nodes().keys().cloned().collect(),
        edges,
        node_metadata: graph
            .nodes()
            .iter()
            .filter(|(_, node)| **node != CardNode::default())
            .map(|(name, node)| (name.clone(), node.clone()))
            .collect(),
        total_decks_processed: Some(graph.total_decks_processed()),
        last_update: graph.last_update().as_ref().map(format_timestamp),
    };

    Ok(serde_json::to_string(&file)?)
}

/// Parses and validates a JSON graph document
pub fn from_json(json: &str) -> AppResult<CoOccurrenceGraph> {
    let file: GraphFile = serde_json::from_str(json)
        .map_err(|e| AppError::Persistence(format!("corrupt graph file: {}", e)))?;

    let mut node_metadata = file.node_metadata;
    let nodes: BTreeMap<String, CardNode> = file
        .nodes
        .into_iter()
        .map(|name| {
            let node = node_metadata.remove(&name).unwrap_or_default();
            (name, node)
        })
        .collect();
    if let Some(orphan) = node_metadata.keys().next() {
        return Err(AppError::Persistence(format!("metadata for unknown node {:?}", orphan)));
    }

    let mut edges = Vec::with_capacity(file.edges.len());
    for (key, record) in file.edges {
        let (a, b) = key
            .split_once(KEY_SEPARATOR)
            .ok_or_else(|| AppError::Persistence(format!("malformed edge key {:?}", key)))?;
        if a == b {
            return Err(AppError::Persistence(format!("self-loop edge for '{}'", a)));
        }

        let first_seen = read_timestamp(&record.first_seen, "first_seen")?;
        let mut edge = Edge::new(a, b, first_seen);
        edge.game = record.game;
        edge.weight = record.weight;
        edge.last_seen = read_timestamp(&record.last_seen, "last_seen")?;
        edge.monthly_counts = record.monthly_counts;
        edge.format_periods = record.format_periods;
        edges.push(edge);
    }

    let last_update = file
        .last_update
        .as_deref()
        .map(|raw| read_timestamp(raw, "last_update"))
        .transpose()?;

    CoOccurrenceGraph::from_parts(nodes, edges, file.total_decks_processed.unwrap_or(0), last_update)
}

pub async fn save(graph: &CoOccurrenceGraph, path: &Path) -> AppResult<()> {
    let json = to_json(graph)?;
    write_atomic(path, json.as_bytes()).await?;

    tracing::info!(
        path = %path.display(),
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "Saved graph as JSON"
    );
    Ok(())
}

pub async fn load(path: &Path) -> AppResult<CoOccurrenceGraph> {
    let json = tokio::fs::read_to_string(path).await?;
    let graph = from_json(&json)?;

    tracing::info!(
        path = %path.display(),
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "Loaded graph from JSON"
    );
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeckCard;
    use chrono::TimeZone;

    fn sample() -> CoOccurrenceGraph {
        let mut graph = CoOccurrenceGraph::new();
        let d1 = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        let d2 = Utc.with_ymd_and_hms(2024, 2, 3, 0, 0, 0).unwrap();
        graph.add_deck(
            &[DeckCard::new("Bolt", 4), DeckCard::new("Shock", 4), DeckCard::new("Mountain", 20)],
            d1,
            Some("Modern"),
            Some("magic"),
        );
        graph.add_deck(&[DeckCard::new("Bolt", 1), DeckCard::new("Shock", 1)], d2, None, None);
        graph.add_deck(&[DeckCard::new("Island", 1)], d2, None, None);
        graph
    }

    #[test]
    fn test_round_trip_preserves_structure() {
        let graph = sample();
        let restored = from_json(&to_json(&graph).unwrap()).unwrap();
        assert_eq!(restored, graph);
        assert!(restored.contains_node("Island"));
        assert_eq!(
            restored.edge("Bolt", "Shock").unwrap().format_periods["Modern_2024"]["2024-01"],
            1
        );
    }

    #[test]
    fn test_document_shape() {
        let json = to_json(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        let edge = &value["edges"]["Bolt\u{0001}Shock"];
        assert_eq!(edge["weight"], 2);
        assert_eq!(edge["monthly_counts"]["2024-02"], 1);
        assert_eq!(value["nodes"][0], "Bolt");
        assert_eq!(value["total_decks_processed"], 3);
        assert_eq!(value["edges"]["Bolt\u{0001}Mountain"]["game"], "MTG");
        assert_eq!(value["node_metadata"]["Bolt"]["total_decks"], 2);
        assert_eq!(value["node_metadata"]["Mountain"]["game"], "MTG");
    }

    #[test]
    fn test_node_metadata_round_trips() {
        let restored = from_json(&to_json(&sample()).unwrap()).unwrap();
        let island = restored.node("Island").unwrap();
        assert_eq!(island.total_decks, 1);
        assert_eq!(island.game, None);
        assert_eq!(restored.node("Shock").unwrap().game.as_deref(), Some("MTG"));
        assert_eq!(restored.edge("Bolt", "Shock").unwrap().game.as_deref(), Some("MTG"));
    }

    #[test]
    fn test_metadata_for_unknown_node_is_corrupt() {
        let json = r#"{"nodes":["A"],"edges":{},"node_metadata":{"B":{"total_decks":1}}}"#;
        assert!(matches!(from_json(json), Err(AppError::Persistence(_))));
    }

    #[test]
    fn test_names_with_separator_are_rejected_on_load() {
        let json = r#"{"nodes":["A\u0001B","C"],"edges":{}}"#;
        assert!(matches!(from_json(json), Err(AppError::Persistence(_))));
    }

    #[test]
    fn test_key_order_and_missing_metadata_are_tolerated() {
        let json = r#"{
            "nodes": ["Shock", "Bolt"],
            "edges": {"Shock\u0001Bolt": {"weight": 1, "first_seen": "2024-01-01T00:00:00Z",
                "last_seen": "2024-01-01T00:00:00Z", "monthly_counts": {"2024-01": 1}}}
        }"#;
        let graph = from_json(json).unwrap();
        assert_eq!(graph.edge("Bolt", "Shock").unwrap().weight, 1);
        assert_eq!(graph.total_decks_processed(), 0);
        assert!(graph.last_update().is_none());
    }

    #[test]
    fn test_corrupt_documents_fail_loudly() {
        let truncated = &to_json(&sample()).unwrap()[..40];
        assert!(matches!(from_json(truncated), Err(AppError::Persistence(_))));

        let bad_weight = r#"{"nodes":["A","B"],"edges":{"A\u0001B":{"weight":3,
            "first_seen":"2024-01-01T00:00:00Z","last_seen":"2024-01-01T00:00:00Z",
            "monthly_counts":{"2024-01":1}}}}"#;
        assert!(matches!(from_json(bad_weight), Err(AppError::Persistence(_))));

        let bad_key = r#"{"nodes":["A","B"],"edges":{"AB":{"weight":0,
            "first_seen":"2024-01-01T00:00:00Z","last_seen":"2024-01-01T00:00:00Z"}}}"#;
        assert!(matches!(from_json(bad_key), Err(AppError::Persistence(_))));

        let bad_month = r#"{"nodes":["A","B"],"edges":{"A\u0001B":{"weight":1,
            "first_seen":"2024-01-01T00:00:00Z","last_seen":"2024-01-01T00:00:00Z",
            "monthly_counts":{"2024-13":1}}}}"#;
        assert!(matches!(from_json(bad_month), Err(AppError::Persistence(_))));
    }

    #[tokio::test]
    async fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        let graph = sample();

        save(&graph, &path).await.unwrap();
        assert_eq!(load(&path).await.unwrap(), graph);
    }

    #[tokio::test]
    async fn test_load_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("absent.json")).await.is_err());
    }
}
