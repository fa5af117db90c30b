pub mod format_period;
pub mod fusion;
pub mod graph;
pub mod ingestion;
pub mod signals;
pub mod temporal_stats;

pub use format_period::{DefaultFormatPeriodResolver, FormatPeriodResolver};
pub use fusion::{Aggregation, FusionConfig, FusionEngine};
pub use graph::{Adjacency, CoOccurrenceGraph, EdgeQuery, GraphStatistics};
pub use ingestion::{ingest_file, ingest_jsonl, IngestionReport, SharedGraph};
pub use signals::{SignalRegistry, SimilaritySignal};
