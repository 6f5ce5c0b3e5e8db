//! Per-repository vector persistence
//!
//! Each repository id owns one LanceDB directory. Next to the table lives a plain-text
//! sidecar holding the version marker of the last completed ingestion; writing that
//! sidecar is the commit point of a run.

pub mod lance_store;
pub use lance_store::LanceStore;

use crate::error::VectorDbError;
use crate::indexer::Chunk;
use std::fs;
use std::path::{Path, PathBuf};

/// Sidecar file name inside a store directory
pub const VERSION_MARKER_FILE: &str = "commit_hash.txt";

/// Destination for embedded chunks
///
/// The orchestrator calls this once per completed batch, in completion order.
#[async_trait::async_trait]
pub trait ChunkSink: Send + Sync {
    /// Persist one batch; returns the number of rows written
    async fn add_chunks(
        &self,
        chunks: &[Chunk],
        vectors: Vec<Vec<f32>>,
    ) -> Result<usize, VectorDbError>;
}

/// A stored chunk returned from a nearest-neighbour query
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub id: String,
    pub content: String,
    pub source: String,
    pub repo: String,
    pub vector: Vec<f32>,
    /// Cosine distance to the query
    pub distance: f32,
}

pub fn version_marker_path(store_dir: &Path) -> PathBuf {
    store_dir.join(VERSION_MARKER_FILE)
}

/// Last committed version marker, if one exists and is non-empty
pub fn read_version_marker(store_dir: &Path) -> Option<String> {
    let content = fs::read_to_string(version_marker_path(store_dir)).ok()?;
    let marker = content.trim();
    (!marker.is_empty()).then(|| marker.to_string())
}

/// Record `marker` as the committed version of this store
///
/// Written through a temporary file and a rename so a crash never leaves a
/// half-written marker behind.
pub fn write_version_marker(store_dir: &Path, marker: &str) -> Result<(), VectorDbError> {
    fs::create_dir_all(store_dir).map_err(|e| {
        VectorDbError::MarkerWriteFailed(format!("{}: {}", store_dir.display(), e))
    })?;

    let target = version_marker_path(store_dir);
    let tmp = store_dir.join(format!("{}.tmp", VERSION_MARKER_FILE));

    fs::write(&tmp, marker)
        .and_then(|_| fs::rename(&tmp, &target))
        .map_err(|e| VectorDbError::MarkerWriteFailed(format!("{}: {}", target.display(), e)))
}
