use std::path::Path;

use crate::error::AppResult;
use crate::services::graph::CoOccurrenceGraph;

use super::write_atomic;

/// Writes sorted `card1\tcard2\tweight` lines for edges with weight >=
/// `min_weight`, returning how many edges were written
pub async fn export_edgelist(graph: &CoOccurrenceGraph, path: &Path, min_weight: i64) -> AppResult<usize> {
    let lines = graph.edgelist_lines(min_weight);
    let count = lines.lines().count();

    write_atomic(path, lines.as_bytes()).await?;

    tracing::info!(path = %path.display(), edges = count, min_weight, "Exported edgelist");
    Ok(count)
}
