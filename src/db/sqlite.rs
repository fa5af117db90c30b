use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{AppError, AppResult};
use crate::models::{parse_timestamp, CardNode, Edge, MonthlyCounts};
use crate::services::graph::CoOccurrenceGraph;

use super::{ensure_parent, remove_quietly, temp_path};

const META_TOTAL_DECKS: &str = "total_decks_processed";
const META_LAST_UPDATE: &str = "last_update";

async fn open(path: &Path, read_only: bool) -> AppResult<SqlitePool> {
    let mut options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(!read_only)
        .read_only(read_only);
    if !read_only {
        // Rollback journal, so a committed file is self-contained and can be renamed
        options = options.journal_mode(SqliteJournalMode::Delete);
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    Ok(pool)
}

async fn create_schema(pool: &SqlitePool) -> AppResult<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS nodes (
            name        TEXT PRIMARY KEY,
            game        TEXT,
            first_seen  TEXT,
            last_seen   TEXT,
            total_decks INTEGER NOT NULL DEFAULT 0
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS edges (
            card1               TEXT NOT NULL,
            card2               TEXT NOT NULL,
            game                TEXT,
            weight              INTEGER NOT NULL,
            first_seen          TEXT NOT NULL,
            last_seen           TEXT NOT NULL,
            monthly_counts_json TEXT NOT NULL,
            format_periods_json TEXT NOT NULL,
            PRIMARY KEY (card1, card2)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE TABLE IF NOT EXISTS graph_meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn write_database(graph: &CoOccurrenceGraph, path: &Path) -> AppResult<()> {
    let pool = open(path, false).await?;
    create_schema(&pool).await?;

    let mut tx = pool.begin().await?;

    for (name, node) in graph.nodes() {
        sqlx::query("INSERT INTO nodes (name, game, first_seen, last_seen, total_decks) VALUES (?, ?, ?, ?, ?)")
            .bind(name.as_str())
            .bind(node.game.as_deref())
            .bind(node.first_seen.as_ref().map(format_timestamp))
            .bind(node.last_seen.as_ref().map(format_timestamp))
            .bind(i64::try_from(node.total_decks).unwrap_or(i64::MAX))
            .execute(&mut *tx)
            .await?;
    }

    for edge in graph.sorted_edges() {
        sqlx::query(
            "INSERT INTO edges
                (card1, card2, game, weight, first_seen, last_seen, monthly_counts_json, format_periods_json)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(edge.card_a.as_str())
        .bind(edge.card_b.as_str())
        .bind(edge.game.as_deref())
        .bind(edge.weight)
        .bind(format_timestamp(&edge.first_seen))
        .bind(format_timestamp(&edge.last_seen))
        .bind(serde_json::to_string(&edge.monthly_counts)?)
        .bind(serde_json::to_string(&edge.format_periods)?)
        .execute(&mut *tx)
        .await?;
    }

    let mut meta = vec![(META_TOTAL_DECKS, graph.total_decks_processed().to_string())];
    if let Some(ts) = graph.last_update() {
        meta.push((META_LAST_UPDATE, format_timestamp(&ts)));
    }
    for (key, value) in meta {
        sqlx::query("INSERT INTO graph_meta (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    pool.close().await;
    Ok(())
}

/// Writes the graph to a fresh database next to `path`, then renames it into
/// place once the transaction has committed
pub async fn save(graph: &CoOccurrenceGraph, path: &Path) -> AppResult<()> {
    ensure_parent(path).await?;
    let tmp = temp_path(path);

    let written = match write_database(graph, &tmp).await {
        Ok(()) => tokio::fs::rename(&tmp, path).await.map_err(AppError::from),
        Err(e) => Err(e),
    };

    if let Err(e) = written {
        remove_quietly(&tmp).await;
        let mut journal = tmp.clone().into_os_string();
        journal.push("-journal");
        remove_quietly(Path::new(&journal)).await;
        return Err(e);
    }

    tracing::info!(
        path = %path.display(),
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "Saved graph to SQLite"
    );
    Ok(())
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn corrupt(what: impl std::fmt::Display) -> AppError {
    AppError::Persistence(format!("corrupt graph database: {}", what))
}

async fn read_meta(pool: &SqlitePool) -> AppResult<BTreeMap<String, String>> {
    let has_meta = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'graph_meta'")
        .fetch_optional(pool)
        .await?
        .is_some();
    if !has_meta {
        return Ok(BTreeMap::new());
    }

    let rows = sqlx::query("SELECT key, value FROM graph_meta").fetch_all(pool).await?;
    let mut meta = BTreeMap::new();
    for row in &rows {
        meta.insert(row.try_get::<String, _>("key")?, row.try_get::<String, _>("value")?);
    }
    Ok(meta)
}

/// Loads and validates a graph database; a missing file is an error
pub async fn load(path: &Path) -> AppResult<CoOccurrenceGraph> {
    tokio::fs::metadata(path).await?;
    let pool = open(path, true).await?;

    let node_rows = sqlx::query("SELECT name, game, first_seen, last_seen, total_decks FROM nodes")
        .fetch_all(&pool)
        .await?;
    let mut nodes = BTreeMap::new();
    for row in &node_rows {
        let first_seen: Option<String> = row.try_get("first_seen")?;
        let last_seen: Option<String> = row.try_get("last_seen")?;
        let total_decks: i64 = row.try_get("total_decks")?;
        let node = CardNode {
            game: row.try_get("game")?,
            first_seen: first_seen.as_deref().map(parse_timestamp).transpose().map_err(corrupt)?,
            last_seen: last_seen.as_deref().map(parse_timestamp).transpose().map_err(corrupt)?,
            total_decks: u64::try_from(total_decks).map_err(corrupt)?,
        };
        nodes.insert(row.try_get::<String, _>("name")?, node);
    }

    let edge_rows = sqlx::query(
        "SELECT card1, card2, game, weight, first_seen, last_seen, monthly_counts_json, format_periods_json
         FROM edges",
    )
    .fetch_all(&pool)
    .await?;

    let mut edges = Vec::with_capacity(edge_rows.len());
    for row in &edge_rows {
        let card1: String = row.try_get("card1")?;
        let card2: String = row.try_get("card2")?;
        let first_seen: String = row.try_get("first_seen")?;
        let last_seen: String = row.try_get("last_seen")?;
        let monthly_json: String = row.try_get("monthly_counts_json")?;
        let periods_json: String = row.try_get("format_periods_json")?;

        let mut edge = Edge::new(&card1, &card2, parse_timestamp(&first_seen).map_err(corrupt)?);
        edge.game = row.try_get("game")?;
        edge.weight = row.try_get("weight")?;
        edge.last_seen = parse_timestamp(&last_seen).map_err(corrupt)?;
        edge.monthly_counts = serde_json::from_str::<MonthlyCounts>(&monthly_json).map_err(corrupt)?;
        edge.format_periods =
            serde_json::from_str::<BTreeMap<String, MonthlyCounts>>(&periods_json).map_err(corrupt)?;
        edges.push(edge);
    }

    let meta = read_meta(&pool).await?;
    pool.close().await;

    let total_decks = meta
        .get(META_TOTAL_DECKS)
        .map(|v| v.parse::<u64>().map_err(corrupt))
        .transpose()?
        .unwrap_or(0);
    let last_update = meta
        .get(META_LAST_UPDATE)
        .map(|v| parse_timestamp(v).map_err(corrupt))
        .transpose()?;

    let graph = CoOccurrenceGraph::from_parts(nodes, edges, total_decks, last_update)?;

    tracing::info!(
        path = %path.display(),
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "Loaded graph from SQLite"
    );
    Ok(graph)
}
