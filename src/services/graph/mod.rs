//! Temporal card co-occurrence graph.
//!
//! Nodes are card names, edges are undirected card pairs that appeared
//! together in at least one deck. Each deck adds exactly one to every pair it
//! contains, independent of how many copies of each card it runs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::db::edgelist;
use crate::error::{AppError, AppResult};
use crate::models::deck::distinct_card_names;
use crate::models::{is_valid_card_name, CardId, CardNode, DeckCard, DeckRecord, Edge, EdgeKey};
use crate::services::format_period::{DefaultFormatPeriodResolver, FormatPeriodResolver};
use crate::services::temporal_stats::{compute_temporal_stats, TemporalStats};

mod split;

/// Card -> set of co-occurring cards
pub type Adjacency = HashMap<CardId, HashSet<CardId>>;

/// Aggregate graph statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStatistics {
    pub num_nodes: usize,
    pub num_edges: usize,
    pub total_decks_processed: u64,
    pub last_update: Option<DateTime<Utc>>,
    pub avg_degree: f64,
    pub max_degree: usize,
    pub avg_edge_weight: f64,
    pub max_edge_weight: i64,
    /// Node count per game code, `Unknown` for cards without one
    pub game_distribution: BTreeMap<String, usize>,
}

/// Filters for [`CoOccurrenceGraph::query_edges`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeQuery {
    pub game: Option<String>,
    pub min_weight: i64,
    pub format: Option<String>,
    /// Only edges last seen at or after this instant
    pub since: Option<DateTime<Utc>>,
}

impl EdgeQuery {
    pub fn new() -> Self {
        Self {
            min_weight: 1,
            ..Self::default()
        }
    }

    pub fn game(mut self, game: impl Into<String>) -> Self {
        self.game = Some(game.into());
        self
    }

    pub fn min_weight(mut self, min_weight: i64) -> Self {
        self.min_weight = min_weight;
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    fn matches(&self, edge: &Edge) -> bool {
        edge.weight >= self.min_weight
            && self.game.as_deref().map_or(true, |game| game_matches(edge.game.as_deref(), game))
            && self
                .format
                .as_deref()
                .map_or(true, |format| edge.formats().any(|f| f.eq_ignore_ascii_case(format.trim())))
            && self.since.map_or(true, |since| edge.last_seen >= since)
    }
}

/// Compares a stored game code with a caller-supplied game name or code
fn game_matches(stored: Option<&str>, wanted: &str) -> bool {
    let wanted = DefaultFormatPeriodResolver::normalize_game(wanted).unwrap_or(wanted);
    stored == Some(wanted)
}

#[derive(Clone)]
pub struct CoOccurrenceGraph {
    nodes: BTreeMap<CardId, CardNode>,
    edges: HashMap<EdgeKey, Edge>,
    /// Derived index, rebuilt whenever edges are replaced wholesale
    neighbors: HashMap<CardId, BTreeSet<CardId>>,
    total_decks_processed: u64,
    last_update: Option<DateTime<Utc>>,
    resolver: Arc<dyn FormatPeriodResolver>,
}

impl Default for CoOccurrenceGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CoOccurrenceGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoOccurrenceGraph")
            .field("nodes", &self.nodes.len())
            .field("edges", &self.edges.len())
            .field("total_decks_processed", &self.total_decks_processed)
            .field("last_update", &self.last_update)
            .finish()
    }
}

/// Structural equality: nodes, edges (with all buckets) and deck bookkeeping.
impl PartialEq for CoOccurrenceGraph {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes
            && self.edges == other.edges
            && self.total_decks_processed == other.total_decks_processed
            && self.last_update == other.last_update
    }
}

impl CoOccurrenceGraph {
    /// Creates an empty graph using the default format period resolver
    pub fn new() -> Self {
        Self::with_resolver(Arc::new(DefaultFormatPeriodResolver))
    }

    pub fn with_resolver(resolver: Arc<dyn FormatPeriodResolver>) -> Self {
        Self {
            nodes: BTreeMap::new(),
            edges: HashMap::new(),
            neighbors: HashMap::new(),
            total_decks_processed: 0,
            last_update: None,
            resolver,
        }
    }

    /// Rebuilds a graph from persisted parts, validating every edge.
    ///
    /// Edge endpoints missing from `nodes` are an error rather than being
    /// silently added.
    pub fn from_parts(
        nodes: BTreeMap<CardId, CardNode>,
        edges: Vec<Edge>,
        total_decks_processed: u64,
        last_update: Option<DateTime<Utc>>,
    ) -> AppResult<Self> {
        let mut graph = Self::new();
        graph.total_decks_processed = total_decks_processed;
        graph.last_update = last_update;

        if let Some(invalid) = nodes.keys().find(|n| !is_valid_card_name(n)) {
            return Err(AppError::Persistence(format!("invalid node name {:?}", invalid)));
        }

        for edge in edges {
            edge.validate().map_err(AppError::Persistence)?;
            for endpoint in [&edge.card_a, &edge.card_b] {
                if !nodes.contains_key(endpoint) {
                    return Err(AppError::Persistence(format!(
                        "edge endpoint '{}' is not a known node",
                        endpoint
                    )));
                }
            }
            let key = (edge.card_a.clone(), edge.card_b.clone());
            if graph.edges.insert(key, edge).is_some() {
                return Err(AppError::Persistence("duplicate edge in persisted graph".to_string()));
            }
        }

        graph.nodes = nodes;
        graph.rebuild_neighbor_index();
        Ok(graph)
    }

    /// Builds an independent graph holding `edges` and their endpoints.
    ///
    /// Endpoints keep their game from this graph; their seen span comes from
    /// `edges` alone and their deck counters start at zero.
    fn sub_graph(&self, edges: Vec<Edge>) -> Self {
        let mut graph = Self::with_resolver(self.resolver.clone());
        for edge in edges {
            for card in [&edge.card_a, &edge.card_b] {
                let node = graph.nodes.entry(card.clone()).or_insert_with(|| CardNode {
                    game: self.nodes.get(card).and_then(|n| n.game.clone()),
                    ..CardNode::default()
                });
                if node.first_seen.map_or(true, |first| edge.first_seen < first) {
                    node.first_seen = Some(edge.first_seen);
                }
                if node.last_seen.map_or(true, |last| edge.last_seen > last) {
                    node.last_seen = Some(edge.last_seen);
                }
            }
            graph
                .edges
                .insert((edge.card_a.clone(), edge.card_b.clone()), edge);
        }
        graph.rebuild_neighbor_index();
        graph
    }

    fn rebuild_neighbor_index(&mut self) {
        self.neighbors.clear();
        for (a, b) in self.edges.keys() {
            self.neighbors.entry(a.clone()).or_default().insert(b.clone());
            self.neighbors.entry(b.clone()).or_default().insert(a.clone());
        }
    }

    /// Adds one deck.
    ///
    /// Card names are deduplicated, so every unordered pair of distinct cards
    /// gains exactly one co-occurrence. When `format` is given, the pair's
    /// format-period bucket for this deck's month is incremented as well.
    /// A recognised `game` is stored on new nodes and edges as its short code.
    /// Returns the number of pairs touched.
    pub fn add_deck(
        &mut self,
        cards: &[DeckCard],
        timestamp: DateTime<Utc>,
        format: Option<&str>,
        game: Option<&str>,
    ) -> usize {
        let names: Vec<CardId> = distinct_card_names(cards).into_iter().collect();
        if names.is_empty() {
            tracing::debug!("Skipping deck without usable card names");
            return 0;
        }

        let period_key = format
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(|f| self.resolver.period_key(game, f, timestamp));

        let game_code = game.and_then(DefaultFormatPeriodResolver::normalize_game);

        for name in &names {
            self.nodes
                .entry(name.clone())
                .and_modify(|node| node.record_deck(timestamp, game_code))
                .or_insert_with(|| CardNode::seen_at(timestamp, game_code));
        }

        let mut touched = 0;
        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                // `names` is sorted, so (a, b) is already canonical
                let key = (a.clone(), b.clone());
                let edge = self
                    .edges
                    .entry(key)
                    .or_insert_with(|| Edge::new(a, b, timestamp));
                edge.record_occurrence(timestamp, period_key.as_deref());
                if edge.game.is_none() {
                    edge.game = game_code.map(str::to_string);
                }
                touched += 1;

                self.neighbors.entry(a.clone()).or_default().insert(b.clone());
                self.neighbors.entry(b.clone()).or_default().insert(a.clone());
            }
        }

        self.total_decks_processed += 1;
        self.last_update = Some(match self.last_update {
            Some(prev) if prev > timestamp => prev,
            _ => timestamp,
        });

        touched
    }

    /// Adds one ingestion record
    pub fn ingest(&mut self, record: &DeckRecord) -> usize {
        self.add_deck(
            &record.cards,
            record.timestamp,
            record.format.as_deref(),
            record.game.as_deref(),
        )
    }

    /// Clears the graph and replays `decks` in the given order
    pub fn rebuild_from_decks<'a>(&mut self, decks: impl IntoIterator<Item = &'a DeckRecord>) {
        self.nodes.clear();
        self.edges.clear();
        self.neighbors.clear();
        self.total_decks_processed = 0;
        self.last_update = None;

        for deck in decks {
            self.ingest(deck);
        }

        tracing::info!(
            nodes = self.nodes.len(),
            edges = self.edges.len(),
            decks = self.total_decks_processed,
            "Graph rebuilt from decks"
        );
    }

    pub fn nodes(&self) -> &BTreeMap<CardId, CardNode> {
        &self.nodes
    }

    pub fn node(&self, card: &str) -> Option<&CardNode> {
        self.nodes.get(card)
    }

    pub fn contains_node(&self, card: &str) -> bool {
        self.nodes.contains_key(card)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    /// Edges in canonical key order
    pub fn sorted_edges(&self) -> Vec<&Edge> {
        let mut edges: Vec<&Edge> = self.edges.values().collect();
        edges.sort_by(|x, y| (&x.card_a, &x.card_b).cmp(&(&y.card_a, &y.card_b)));
        edges
    }

    /// Looks up the edge between two cards in either order
    pub fn edge(&self, a: &str, b: &str) -> Option<&Edge> {
        self.edges.get(&Edge::key(a, b))
    }

    /// Activity summary for the edge between `a` and `b` over its own lifetime
    pub fn edge_stats(&self, a: &str, b: &str) -> Option<TemporalStats> {
        self.edge(a, b).map(|edge| {
            compute_temporal_stats(&edge.monthly_counts, edge.first_seen, edge.last_seen, edge.weight)
        })
    }

    pub fn total_decks_processed(&self) -> u64 {
        self.total_decks_processed
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    /// Cards sharing an edge of at least `min_weight` with `card`, optionally
    /// only through edges of one game (`MTG` or `magic` alike)
    pub fn get_neighbors(&self, card: &str, min_weight: i64, game: Option<&str>) -> BTreeSet<CardId> {
        let Some(candidates) = self.neighbors.get(card) else {
            return BTreeSet::new();
        };

        candidates
            .iter()
            .filter(|other| {
                self.edge(card, other)
                    .map(|e| {
                        e.weight >= min_weight && game.map_or(true, |g| game_matches(e.game.as_deref(), g))
                    })
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Edges matching every filter in `query`, in canonical key order
    pub fn query_edges(&self, query: &EdgeQuery) -> Vec<&Edge> {
        self.sorted_edges()
            .into_iter()
            .filter(|edge| query.matches(edge))
            .collect()
    }

    /// Cards first seen at or after `since`, sorted by name
    pub fn get_new_cards_since(&self, since: DateTime<Utc>) -> Vec<CardId> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.first_seen.map_or(false, |first| first >= since))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Adjacency over edges with weight >= `min_weight`
    pub fn to_adjacency_dict(&self, min_weight: i64) -> Adjacency {
        let mut adjacency = Adjacency::new();
        for edge in self.edges.values().filter(|e| e.weight >= min_weight) {
            adjacency
                .entry(edge.card_a.clone())
                .or_default()
                .insert(edge.card_b.clone());
            adjacency
                .entry(edge.card_b.clone())
                .or_default()
                .insert(edge.card_a.clone());
        }
        adjacency
    }

    /// Edges last seen at or after `since`, in canonical key order
    pub fn edges_since(&self, since: DateTime<Utc>, min_weight: i64) -> Vec<&Edge> {
        self.query_edges(&EdgeQuery::new().min_weight(min_weight).since(since))
    }

    /// Sorted `card1\tcard2\tweight` lines for edges with weight >= `min_weight`
    pub fn edgelist_lines(&self, min_weight: i64) -> String {
        let mut out = String::new();
        for edge in self.sorted_edges() {
            if edge.weight >= min_weight {
                out.push_str(&format!("{}\t{}\t{}\n", edge.card_a, edge.card_b, edge.weight));
            }
        }
        out
    }

    /// Writes the edgelist to `path` atomically
    pub async fn export_edgelist(&self, path: &Path, min_weight: i64) -> AppResult<usize> {
        edgelist::export_edgelist(self, path, min_weight).await
    }

    pub fn statistics(&self) -> GraphStatistics {
        let degrees: Vec<usize> = self.neighbors.values().map(BTreeSet::len).collect();
        let weights: Vec<i64> = self.edges.values().map(|e| e.weight).collect();

        let mean = |sum: f64, n: usize| if n == 0 { 0.0 } else { sum / n as f64 };

        let mut game_distribution = BTreeMap::new();
        for node in self.nodes.values() {
            let game = node.game.clone().unwrap_or_else(|| "Unknown".to_string());
            *game_distribution.entry(game).or_insert(0) += 1;
        }

        GraphStatistics {
            num_nodes: self.nodes.len(),
            num_edges: self.edges.len(),
            total_decks_processed: self.total_decks_processed,
            last_update: self.last_update,
            avg_degree: mean(degrees.iter().sum::<usize>() as f64, degrees.len()),
            max_degree: degrees.iter().copied().max().unwrap_or(0),
            avg_edge_weight: mean(weights.iter().sum::<i64>() as f64, weights.len()),
            max_edge_weight: weights.iter().copied().max().unwrap_or(0),
            game_distribution,
        }
    }
}
