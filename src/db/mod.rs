//! Graph persistence.
//!
//! Saves are atomic: the new artifact is fully written next to the target
//! and then renamed over it, so a reader sees either the old file or the new
//! one. Loads validate everything and never return a partial graph.

use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::AppResult;
use crate::services::graph::CoOccurrenceGraph;

pub mod edgelist;
pub mod json;
pub mod sqlite;

/// On-disk representation, chosen from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    Json,
    Sqlite,
}

impl GraphFormat {
    /// `.db`, `.sqlite` and `.sqlite3` are SQLite; anything else is JSON
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match ext.as_deref() {
            Some("db" | "sqlite" | "sqlite3") => GraphFormat::Sqlite,
            _ => GraphFormat::Json,
        }
    }
}

/// Saves `graph` to `path` in the format implied by its extension
pub async fn save_graph(graph: &CoOccurrenceGraph, path: &Path) -> AppResult<()> {
    match GraphFormat::from_path(path) {
        GraphFormat::Json => json::save(graph, path).await,
        GraphFormat::Sqlite => sqlite::save(graph, path).await,
    }
}

/// Loads a graph from `path` in the format implied by its extension
pub async fn load_graph(path: &Path) -> AppResult<CoOccurrenceGraph> {
    match GraphFormat::from_path(path) {
        GraphFormat::Json => json::load(path).await,
        GraphFormat::Sqlite => sqlite::load(path).await,
    }
}

/// Unique sibling path used while a save is in progress
pub(crate) fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "graph".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4()))
}

pub(crate) async fn ensure_parent(path: &Path) -> AppResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

/// Writes `contents` to `path` via a temp file and rename
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> AppResult<()> {
    ensure_parent(path).await?;
    let tmp = temp_path(path);

    let written = async {
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = written {
        remove_quietly(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Best-effort cleanup of a leftover temp artifact
pub(crate) async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove temporary file");
        }
    }
}
