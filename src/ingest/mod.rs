//! Repository ingestion pipeline
//!
//! `version check -> (skip | wipe -> fetch -> collect -> split -> embed -> commit)`.
//!
//! Every blocking step (libgit2, filesystem walk, chunking) runs on a blocking thread
//! and is awaited in order; only embedding fans out. The version marker sidecar is
//! written last, so an interrupted run is always rebuilt from scratch next time.

pub mod fs_lock;
pub mod orchestrator;
pub mod progress;
pub mod retry;

pub use fs_lock::FsLockGuard;
pub use orchestrator::{EmbedProgress, EmbedReport, EmbeddingOrchestrator};
pub use progress::{ProgressFn, ProgressReporter, Stage};
pub use retry::RetryPolicy;

use crate::config::{Config, EmbeddingConfig};
use crate::embedding::{EmbeddingProvider, load_provider};
use crate::error::{EmbeddingError, IndexingError, RagError, Result, ValidationError};
use crate::git::{check_remote_version, fetch_snapshot};
use crate::identity::{RepoLocation, RepositoryId, RepositoryLocator};
use crate::indexer::{FileCollector, TextChunker};
use crate::retriever::{Retriever, RetrieverHandle};
use crate::vector_db::{LanceStore, read_version_marker, write_version_marker};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use walkdir::WalkDir;

/// Whether an ingestion run rebuilt the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Skipped,
    Updated,
}

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub store_path: PathBuf,
    pub status: IngestStatus,
    pub repository_id: RepositoryId,
    pub locator: RepositoryLocator,
    /// Version marker now committed for this store, if any
    pub version: Option<String>,
    /// Present for `Updated` runs
    pub report: Option<EmbedReport>,
}

/// True iff the store exists, has a committed marker, the remote version is known,
/// and the two match. Every other state forces a full rebuild.
pub fn should_skip(location: &RepoLocation, remote_version: Option<&str>) -> bool {
    let Some(remote) = remote_version else {
        return false;
    };
    if !location.store_dir.is_dir() {
        return false;
    }
    read_version_marker(&location.store_dir).is_some_and(|local| local == remote)
}

/// Delete `path` recursively, clearing read-only bits first
///
/// Returns whether anything existed.
pub fn force_remove_dir(path: &Path) -> std::io::Result<bool> {
    if !path.exists() {
        return Ok(false);
    }

    for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
        if let Ok(metadata) = entry.metadata() {
            let mut permissions = metadata.permissions();
            if permissions.readonly() {
                #[allow(clippy::permissions_set_readonly_false)]
                permissions.set_readonly(false);
                if let Err(e) = std::fs::set_permissions(entry.path(), permissions) {
                    tracing::debug!("Could not make {:?} writable: {}", entry.path(), e);
                }
            }
        }
    }

    std::fs::remove_dir_all(path)?;
    Ok(true)
}

async fn blocking<T, F>(what: &str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| IndexingError::TaskFailed(format!("{}: {}", what, e)))?
}

/// Ingestion entry point; owns nothing but configuration
#[derive(Debug, Clone)]
pub struct Ingestor {
    config: Arc<Config>,
}

impl Ingestor {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Normalize `input` and resolve its on-disk locations
    pub fn locate(&self, input: &str) -> Result<RepoLocation> {
        if input.trim().is_empty() {
            return Err(ValidationError::Empty("repository locator".to_string()).into());
        }
        Ok(RepoLocation::resolve(&self.config.storage.data_dir, input))
    }

    /// Ingest a repository with the backend described by `embedding`
    ///
    /// A missing credential or unknown provider fails before any fetch happens.
    pub async fn ingest(
        &self,
        locator: &str,
        progress: Arc<ProgressFn>,
        force_update: bool,
        embedding: &EmbeddingConfig,
    ) -> Result<IngestOutcome> {
        let embedding = embedding.clone();
        self.run(locator, progress, force_update, async move {
            load_provider(&embedding).await
        })
        .await
    }

    /// Ingest a repository with an already constructed embedding backend
    pub async fn ingest_with_provider(
        &self,
        locator: &str,
        progress: Arc<ProgressFn>,
        force_update: bool,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<IngestOutcome> {
        self.run(locator, progress, force_update, async move { Ok(provider) })
            .await
    }

    async fn run<P>(
        &self,
        locator: &str,
        progress: Arc<ProgressFn>,
        force_update: bool,
        provider: P,
    ) -> Result<IngestOutcome>
    where
        P: Future<Output = std::result::Result<Arc<dyn EmbeddingProvider>, EmbeddingError>>,
    {
        let location = self.locate(locator)?;
        let reporter = ProgressReporter::new(progress);

        tracing::info!(
            "Ingesting {} (id {}, force_update={})",
            location.locator,
            location.id,
            force_update
        );

        let _lock = self.lock(&location).await?;

        reporter.enter(Stage::VersionCheck, "Checking remote version...");
        let (base, branch) = {
            let (base, branch) = location.locator.split_branch();
            (base.to_string(), branch.map(str::to_string))
        };
        let remote_version = {
            let (base, branch) = (base.clone(), branch.clone());
            blocking("version check", move || {
                Ok(check_remote_version(&base, branch.as_deref()))
            })
            .await?
        };

        if !force_update && should_skip(&location, remote_version.as_deref()) {
            tracing::info!("{} unchanged at {:?}, skipping", location.locator, remote_version);
            reporter.finish("Version unchanged, using existing index");
            return Ok(IngestOutcome {
                store_path: location.store_dir.clone(),
                status: IngestStatus::Skipped,
                repository_id: location.id.clone(),
                locator: location.locator.clone(),
                version: remote_version,
                report: None,
            });
        }

        let provider = provider.await?;

        {
            let snapshot_dir = location.snapshot_dir.clone();
            let store_dir = location.store_dir.clone();
            blocking("cleanup", move || {
                force_remove_dir(&snapshot_dir)?;
                force_remove_dir(&store_dir)?;
                if let Some(parent) = snapshot_dir.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                Ok(())
            })
            .await?;
        }

        reporter.enter(Stage::Fetch, "Cloning repository (depth 1)...");
        let snapshot = {
            let dest = location.snapshot_dir.clone();
            let fetch_reporter = reporter.clone();
            blocking("fetch", move || {
                fetch_snapshot(&base, branch.as_deref(), &dest, &|message: &str, fraction: f32| {
                    fetch_reporter.report(Stage::Fetch, fraction, message)
                })
                .map_err(RagError::from)
            })
            .await?
        };

        reporter.enter(Stage::Collect, "Scanning files...");
        let documents = {
            let root = snapshot.path.clone();
            let repo = location.locator.to_string();
            let max_files = self.config.indexing.max_files;
            let collect_reporter = reporter.clone();
            blocking("collect", move || {
                FileCollector::new(&root, repo, max_files)
                    .collect(&|count: usize| {
                        collect_reporter.report(
                            Stage::Collect,
                            count as f32 / max_files as f32,
                            &format!("Read {} files...", count),
                        )
                    })
                    .map_err(RagError::from)
            })
            .await?
        };

        reporter.enter(
            Stage::Split,
            &format!("Splitting {} files...", documents.len()),
        );
        let chunks = {
            let chunker = TextChunker::new(
                self.config.indexing.chunk_size,
                self.config.indexing.chunk_overlap,
            );
            blocking("split", move || Ok(chunker.chunk_documents(&documents))).await?
        };

        reporter.enter(
            Stage::Embed,
            &format!(
                "Embedding {} chunks with {}...",
                chunks.len(),
                provider.model_name()
            ),
        );
        let store = LanceStore::open(&location.store_dir).await?;
        let orchestrator = EmbeddingOrchestrator::from_config(&self.config.batching);
        let embed_reporter = reporter.clone();
        let report = orchestrator
            .run(&chunks, provider, &store, &move |p: EmbedProgress| {
                let eta = p
                    .eta
                    .map(|d| format!(", ETA {}s", d.as_secs()))
                    .unwrap_or_default();
                embed_reporter.report(
                    Stage::Embed,
                    p.fraction(),
                    &format!("Embedding: {}/{}{}", p.processed_chunks, p.total_chunks, eta),
                );
            })
            .await?;

        if report.stored_chunks == 0 {
            return Err(EmbeddingError::GenerationFailed(format!(
                "every batch failed; {}",
                report.errors.first().map(String::as_str).unwrap_or("no details")
            ))
            .into());
        }

        let version = remote_version.or(Some(snapshot.head));
        if let Some(marker) = version.as_deref() {
            write_version_marker(&location.store_dir, marker)?;
        }

        reporter.finish("Ready");
        tracing::info!(
            "Ingested {}: {} chunks stored at {}",
            location.locator,
            report.stored_chunks,
            location.store_dir.display()
        );

        Ok(IngestOutcome {
            store_path: location.store_dir.clone(),
            status: IngestStatus::Updated,
            repository_id: location.id.clone(),
            locator: location.locator.clone(),
            version,
            report: Some(report),
        })
    }

    async fn lock(&self, location: &RepoLocation) -> Result<FsLockGuard> {
        let lock_path = location.lock_path.clone();
        let timeout = Duration::from_secs(self.config.storage.lock_timeout_secs);

        let guard = blocking("lock", move || {
            FsLockGuard::acquire_blocking(&lock_path, timeout).map_err(RagError::from)
        })
        .await?;

        guard.ok_or_else(|| RagError::Busy(location.locator.to_string()))
    }

    /// Delete the snapshot and vector store of a repository
    ///
    /// Returns whether anything was deleted.
    pub async fn remove_repository_data(&self, locator: &str) -> Result<bool> {
        let location = self.locate(locator)?;
        let _lock = self.lock(&location).await?;

        let snapshot_dir = location.snapshot_dir.clone();
        let store_dir = location.store_dir.clone();
        let deleted = blocking("remove", move || {
            let snapshot = force_remove_dir(&snapshot_dir)?;
            let store = force_remove_dir(&store_dir)?;
            Ok(snapshot || store)
        })
        .await?;

        tracing::info!(
            "Removed data for {} (anything deleted: {})",
            location.locator,
            deleted
        );
        Ok(deleted)
    }

    /// Open a retrieval handle; `None` when the repository has no store yet
    pub async fn retriever(
        &self,
        locator: &str,
        embedding: &EmbeddingConfig,
    ) -> Result<Option<RetrieverHandle>> {
        let location = self.locate(locator)?;
        Retriever::open(&location, embedding, &self.config.retrieval).await
    }
}

#[cfg(test)]
mod tests;
