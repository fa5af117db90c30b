use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::RwLock;

use crate::error::AppResult;
use crate::models::DeckRecord;
use crate::services::graph::CoOccurrenceGraph;

/// Outcome of one ingestion run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestionReport {
    /// Records applied to the graph
    pub ingested: usize,
    /// Malformed or empty lines that were skipped
    pub skipped: usize,
    /// Pair increments applied across all ingested decks
    pub pairs: usize,
}

/// Ingests newline-delimited JSON deck records.
///
/// A malformed line, including one that is not valid UTF-8, is logged and
/// skipped; it never aborts the run. Only I/O failures on the reader are
/// returned as errors.
pub async fn ingest_jsonl<R>(graph: &mut CoOccurrenceGraph, mut reader: R) -> AppResult<IngestionReport>
where
    R: AsyncBufRead + Unpin,
{
    let mut report = IngestionReport::default();
    let mut buf = Vec::new();
    let mut line_no = 0usize;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        line_no += 1;

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "Skipping deck record that is not valid UTF-8");
                report.skipped += 1;
                continue;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match DeckRecord::from_json(trimmed) {
            Ok(record) => {
                report.pairs += graph.ingest(&record);
                report.ingested += 1;
            }
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "Skipping malformed deck record");
                report.skipped += 1;
            }
        }
    }

    tracing::info!(
        ingested = report.ingested,
        skipped = report.skipped,
        pairs = report.pairs,
        "Deck ingestion finished"
    );

    Ok(report)
}

/// Ingests a JSONL file of deck records
pub async fn ingest_file(graph: &mut CoOccurrenceGraph, path: &Path) -> AppResult<IngestionReport> {
    let file = tokio::fs::File::open(path).await?;
    tracing::info!(path = %path.display(), "Ingesting decks");
    ingest_jsonl(graph, BufReader::new(file)).await
}

/// Graph shared between one writer and many readers.
///
/// Writers take the lock for the duration of an ingest. Readers call
/// [`SharedGraph::publish`] to take an immutable snapshot, so queries never
/// observe a half-applied deck.
#[derive(Clone, Default)]
pub struct SharedGraph {
    inner: Arc<RwLock<CoOccurrenceGraph>>,
}

impl SharedGraph {
    pub fn new(graph: CoOccurrenceGraph) -> Self {
        Self {
            inner: Arc::new(RwLock::new(graph)),
        }
    }

    /// Applies one deck under the write lock
    pub async fn ingest(&self, record: &DeckRecord) -> usize {
        self.inner.write().await.ingest(record)
    }

    /// Applies a JSONL stream under a single write lock
    pub async fn ingest_jsonl<R>(&self, reader: R) -> AppResult<IngestionReport>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut graph = self.inner.write().await;
        ingest_jsonl(&mut graph, reader).await
    }

    /// Immutable snapshot of the current graph
    pub async fn publish(&self) -> Arc<CoOccurrenceGraph> {
        let graph = self.inner.read().await;
        Arc::new(graph.clone())
    }

    /// Replaces the graph wholesale, e.g. after a reload from disk
    pub async fn replace(&self, graph: CoOccurrenceGraph) {
        *self.inner.write().await = graph;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DECKS: &str = r#"{"cards":[{"name":"Bolt","count":4},{"name":"Shock","count":4},{"name":"Mountain","count":20}],"timestamp":"2024-01-15T00:00:00Z"}

not json at all
{"cards":[{"name":"Bolt"},{"name":"Shock"}],"timestamp":"2024-02-03"}
{"cards":[{"name":"Bolt"}],"timestamp":"yesterday"}
"#;

    #[tokio::test]
    async fn test_ingest_jsonl_skips_malformed_lines() {
        let mut graph = CoOccurrenceGraph::new();
        let report = ingest_jsonl(&mut graph, DECKS.as_bytes()).await.unwrap();

        assert_eq!(report.ingested, 2);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.pairs, 4);
        assert_eq!(graph.edge("Bolt", "Shock").unwrap().weight, 2);
        assert_eq!(graph.total_decks_processed(), 2);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_skipped() {
        let mut input = br#"{"cards":[{"name":"Bolt"},{"name":"Shock"}],"timestamp":"2024-01-01"}"#.to_vec();
        input.extend_from_slice(b"\n{\"cards\":[{\"name\":\"\xff\xfe\"}],\"timestamp\":\"2024-01-02\"}\n");
        input.extend_from_slice(br#"{"cards":[{"name":"Chain Lightning"},{"name":"Shock"}],"timestamp":"2024-01-03"}"#);

        let mut graph = CoOccurrenceGraph::new();
        let report = ingest_jsonl(&mut graph, input.as_slice()).await.unwrap();

        assert_eq!(report.ingested, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(graph.total_decks_processed(), 2);
        assert!(graph.contains_node("Chain Lightning"));
    }

    #[tokio::test]
    async fn test_ingest_file_missing_is_io_error() {
        let mut graph = CoOccurrenceGraph::new();
        let result = ingest_file(&mut graph, Path::new("/nonexistent/decks.jsonl")).await;
        assert!(matches!(result, Err(crate::error::AppError::Io(_))));
    }

    #[tokio::test]
    async fn test_published_snapshot_is_isolated_from_later_writes() {
        let shared = SharedGraph::default();
        shared.ingest_jsonl(DECKS.as_bytes()).await.unwrap();

        let snapshot = shared.publish().await;
        let record = DeckRecord::from_json(r#"{"cards":[{"name":"Bolt"},{"name":"Shock"}],"timestamp":"2024-03-01"}"#)
            .unwrap();
        shared.ingest(&record).await;

        assert_eq!(snapshot.edge("Bolt", "Shock").unwrap().weight, 2);
        assert_eq!(shared.publish().await.edge("Bolt", "Shock").unwrap().weight, 3);
    }

    #[test]
    fn test_shared_graph_blocking_usage() {
        let shared = SharedGraph::new(CoOccurrenceGraph::new());
        let report = tokio_test::block_on(shared.ingest_jsonl(DECKS.as_bytes())).unwrap();
        assert_eq!(report.ingested, 2);
    }
}
