//! LanceDB-backed store for one repository
//!
//! Table `chunks` is created lazily on the first write, with the vector dimension of
//! that batch. Later batches of a different dimension are rejected.

use super::{ChunkSink, StoredChunk};
use crate::error::VectorDbError;
use crate::indexer::{Chunk, ChunkMetadata};
use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
    types::Float32Type,
};
use arrow_schema::{DataType, Field, Schema};
use futures::stream::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{DistanceType, Table};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

const TABLE_NAME: &str = "chunks";

/// Embedded LanceDB store rooted at one repository's store directory
pub struct LanceStore {
    connection: Connection,
    path: PathBuf,
    /// Opened table and its vector dimension, once known
    table: Mutex<Option<(Table, usize)>>,
}

impl LanceStore {
    /// Open (or create) the store directory at `path`
    pub async fn open(path: &Path) -> Result<Self, VectorDbError> {
        let open_failed = |reason: String| VectorDbError::OpenFailed {
            path: path.display().to_string(),
            reason,
        };

        std::fs::create_dir_all(path).map_err(|e| open_failed(e.to_string()))?;

        tracing::debug!("Connecting to LanceDB at: {}", path.display());
        let connection = lancedb::connect(&path.to_string_lossy())
            .execute()
            .await
            .map_err(|e| open_failed(e.to_string()))?;

        let store = Self {
            connection,
            path: path.to_path_buf(),
            table: Mutex::new(None),
        };

        let existing = store
            .open_existing_table()
            .await
            .map_err(|e| open_failed(format!("{:#}", e)))?;
        *store.table.lock().await = existing;

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open_existing_table(&self) -> Result<Option<(Table, usize)>> {
        let names = self
            .connection
            .table_names()
            .execute()
            .await
            .context("Failed to list tables")?;

        if !names.iter().any(|n| n == TABLE_NAME) {
            return Ok(None);
        }

        let table = self
            .connection
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table")?;
        let schema = table.schema().await.context("Failed to read table schema")?;
        let dimension = match schema.field_with_name("vector").map(|f| f.data_type()) {
            Ok(DataType::FixedSizeList(_, dim)) => *dim as usize,
            _ => anyhow::bail!("Table '{}' has no fixed-size vector column", TABLE_NAME),
        };

        Ok(Some((table, dimension)))
    }

    fn create_schema(dimension: usize) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension as i32,
                ),
                false,
            ),
            Field::new("id", DataType::Utf8, false),
            Field::new("source", DataType::Utf8, false),
            Field::new("repo", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
        ]))
    }

    fn create_record_batch(
        ids: Vec<String>,
        texts: Vec<String>,
        metadatas: &[ChunkMetadata],
        vectors: Vec<Vec<f32>>,
        schema: Arc<Schema>,
        dimension: usize,
    ) -> Result<RecordBatch> {
        let vector_array = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
            vectors.into_iter().map(|v| Some(v.into_iter().map(Some))),
            dimension as i32,
        );
        let source_array = StringArray::from(
            metadatas
                .iter()
                .map(|m| m.source.as_str())
                .collect::<Vec<_>>(),
        );
        let repo_array = StringArray::from(
            metadatas
                .iter()
                .map(|m| m.repo.as_str())
                .collect::<Vec<_>>(),
        );

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(vector_array),
                Arc::new(StringArray::from(ids)),
                Arc::new(source_array),
                Arc::new(repo_array),
                Arc::new(StringArray::from(texts)),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    /// Append rows; all four inputs must have the same length
    pub async fn add_texts(
        &self,
        ids: Vec<String>,
        texts: Vec<String>,
        metadatas: Vec<ChunkMetadata>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<usize, VectorDbError> {
        let count = vectors.len();
        if count == 0 {
            return Ok(0);
        }
        if ids.len() != count || texts.len() != count || metadatas.len() != count {
            return Err(VectorDbError::StoreFailed(format!(
                "length mismatch: {} ids, {} texts, {} metadatas, {} vectors",
                ids.len(),
                texts.len(),
                metadatas.len(),
                count
            )));
        }

        let dimension = vectors[0].len();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(VectorDbError::DimensionMismatch {
                expected: dimension,
                actual: bad.len(),
            });
        }

        let schema = Self::create_schema(dimension);
        let batch =
            Self::create_record_batch(ids, texts, &metadatas, vectors, schema.clone(), dimension)
                .map_err(|e| VectorDbError::StoreFailed(format!("{:#}", e)))?;
        let batches = RecordBatchIterator::new(vec![batch].into_iter().map(Ok), schema);

        let mut guard = self.table.lock().await;
        match guard.as_ref() {
            Some((table, existing)) => {
                if *existing != dimension {
                    return Err(VectorDbError::DimensionMismatch {
                        expected: *existing,
                        actual: dimension,
                    });
                }
                table
                    .add(Box::new(batches))
                    .execute()
                    .await
                    .map_err(|e| VectorDbError::StoreFailed(e.to_string()))?;
            }
            None => {
                let table = self
                    .connection
                    .create_table(TABLE_NAME, Box::new(batches))
                    .execute()
                    .await
                    .map_err(|e| VectorDbError::StoreFailed(e.to_string()))?;
                tracing::info!(
                    "Created table '{}' (dimension {}) at {}",
                    TABLE_NAME,
                    dimension,
                    self.path.display()
                );
                *guard = Some((table, dimension));
            }
        }

        tracing::debug!("Stored {} rows in {}", count, self.path.display());
        Ok(count)
    }

    /// Number of stored rows (0 before the first write)
    pub async fn count(&self) -> Result<usize, VectorDbError> {
        let guard = self.table.lock().await;
        match guard.as_ref() {
            Some((table, _)) => table
                .count_rows(None)
                .await
                .map_err(|e| VectorDbError::SearchFailed(e.to_string())),
            None => Ok(0),
        }
    }

    /// The `fetch_k` nearest rows by cosine distance, with their stored vectors
    pub async fn similarity_search_with_vectors(
        &self,
        query: Vec<f32>,
        fetch_k: usize,
    ) -> Result<Vec<StoredChunk>, VectorDbError> {
        let table = match self.table.lock().await.as_ref() {
            Some((table, _)) => table.clone(),
            None => return Ok(Vec::new()),
        };

        self.search_table(&table, query, fetch_k)
            .await
            .map_err(|e| VectorDbError::SearchFailed(format!("{:#}", e)))
    }

    async fn search_table(
        &self,
        table: &Table,
        query: Vec<f32>,
        limit: usize,
    ) -> Result<Vec<StoredChunk>> {
        let batches: Vec<RecordBatch> = table
            .vector_search(query)
            .context("Failed to create vector search")?
            .distance_type(DistanceType::Cosine)
            .limit(limit)
            .execute()
            .await
            .context("Failed to execute search")?
            .try_collect()
            .await
            .context("Failed to collect search results")?;

        let mut results = Vec::new();
        for batch in &batches {
            let ids = string_column(batch, "id")?;
            let sources = string_column(batch, "source")?;
            let repos = string_column(batch, "repo")?;
            let contents = string_column(batch, "content")?;

            let distances = batch
                .column_by_name("_distance")
                .context("Missing _distance column")?
                .as_any()
                .downcast_ref::<Float32Array>()
                .context("Invalid _distance type")?;
            let vectors = batch
                .column_by_name("vector")
                .context("Missing vector column")?
                .as_any()
                .downcast_ref::<FixedSizeListArray>()
                .context("Invalid vector type")?;

            for i in 0..batch.num_rows() {
                let row = vectors.value(i);
                let values = row
                    .as_any()
                    .downcast_ref::<Float32Array>()
                    .context("Invalid vector element type")?;

                results.push(StoredChunk {
                    id: ids.value(i).to_string(),
                    content: contents.value(i).to_string(),
                    source: sources.value(i).to_string(),
                    repo: repos.value(i).to_string(),
                    vector: values.values().to_vec(),
                    distance: distances.value(i),
                });
            }
        }

        Ok(results)
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .with_context(|| format!("Missing {} column", name))?
        .as_any()
        .downcast_ref::<StringArray>()
        .with_context(|| format!("Invalid {} type", name))
}

#[async_trait::async_trait]
impl ChunkSink for LanceStore {
    async fn add_chunks(
        &self,
        chunks: &[Chunk],
        vectors: Vec<Vec<f32>>,
    ) -> Result<usize, VectorDbError> {
        self.add_texts(
            chunks.iter().map(Chunk::id).collect(),
            chunks.iter().map(|c| c.text.clone()).collect(),
            chunks.iter().map(|c| c.metadata.clone()).collect(),
            vectors,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunk(source: &str, index: usize, text: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            metadata: ChunkMetadata {
                source: source.to_string(),
                repo: "https://github.com/acme/widgets".to_string(),
            },
            index,
        }
    }

    #[tokio::test]
    async fn test_empty_store_has_no_rows() {
        let dir = TempDir::new().unwrap();
        let store = LanceStore::open(dir.path()).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(
            store
                .similarity_search_with_vectors(vec![1.0, 0.0], 5)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_add_and_search() {
        let dir = TempDir::new().unwrap();
        let store = LanceStore::open(dir.path()).await.unwrap();

        let chunks = vec![
            chunk("a.rs", 0, "alpha"),
            chunk("b.rs", 0, "beta"),
            chunk("c.rs", 0, "gamma"),
        ];
        let vectors = vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]];
        assert_eq!(store.add_chunks(&chunks, vectors).await.unwrap(), 3);
        assert_eq!(store.count().await.unwrap(), 3);

        let results = store
            .similarity_search_with_vectors(vec![0.9, 0.1, 0.0], 2)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].source, "a.rs");
        assert_eq!(results[0].id, "a.rs#0");
        assert_eq!(results[0].content, "alpha");
        assert_eq!(results[0].vector, vec![1.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_reopen_sees_existing_rows() {
        let dir = TempDir::new().unwrap();
        {
            let store = LanceStore::open(dir.path()).await.unwrap();
            store
                .add_chunks(&[chunk("a.rs", 0, "alpha")], vec![vec![1.0, 0.0]])
                .await
                .unwrap();
        }

        let store = LanceStore::open(dir.path()).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let store = LanceStore::open(dir.path()).await.unwrap();
        store
            .add_chunks(&[chunk("a.rs", 0, "alpha")], vec![vec![1.0, 0.0]])
            .await
            .unwrap();

        let err = store
            .add_chunks(&[chunk("b.rs", 0, "beta")], vec![vec![1.0, 0.0, 0.0]])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VectorDbError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_length_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let store = LanceStore::open(dir.path()).await.unwrap();
        let err = store
            .add_chunks(&[chunk("a.rs", 0, "alpha")], vec![vec![1.0], vec![0.5]])
            .await
            .unwrap_err();
        assert!(matches!(err, VectorDbError::StoreFailed(_)));
    }
}
