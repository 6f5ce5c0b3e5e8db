//! Serving layer shared by the MCP server and the CLI
//!
//! Owns the [`Ingestor`] and the [`RetrieverCache`]. Every ingest that was not skipped,
//! failed ones included, and every removal invalidates the repository's cached
//! retrievers, so a later search never reads a store that has been replaced on disk.

use crate::config::{Config, EmbeddingConfig};
use crate::error::{RagError, Result};
use crate::ingest::{IngestStatus, Ingestor, ProgressFn};
use crate::qa::{ChatModel, MistralChat, answer_question};
use crate::retriever::{RetrieverCache, RetrieverHandle};
use crate::types::*;
use std::sync::Arc;
use std::time::Instant;

/// Main entry point for using repo-rag as a library
///
/// # Example
///
/// ```no_run
/// use repo_rag::config::Config;
/// use repo_rag::service::RagService;
/// use repo_rag::types::{IngestRequest, SearchRequest};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let service = RagService::new(Config::new()?);
///
///     let ingest = IngestRequest {
///         repository: "https://github.com/acme/widgets".to_string(),
///         force_update: false,
///         embedding: None,
///     };
///     let response = service.ingest(ingest, Arc::new(|_: &str, _: u8| {})).await?;
///     println!("{:?}", response.status);
///
///     let search = SearchRequest {
///         repository: "https://github.com/acme/widgets".to_string(),
///         query: "where is the HTTP router configured?".to_string(),
///         embedding: None,
///     };
///     for hit in service.search(search).await?.results {
///         println!("{} ({:.2})", hit.source, hit.score);
///     }
///     Ok(())
/// }
/// ```
pub struct RagService {
    ingestor: Ingestor,
    retrievers: RetrieverCache,
}

impl RagService {
    pub fn new(config: Config) -> Self {
        Self {
            ingestor: Ingestor::new(config),
            retrievers: RetrieverCache::new(),
        }
    }

    /// Create a service from the config file and environment
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(Config::new()?))
    }

    pub fn config(&self) -> &Config {
        self.ingestor.config()
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    pub fn retrievers(&self) -> &RetrieverCache {
        &self.retrievers
    }

    fn embedding_for<'a>(&'a self, requested: &'a Option<EmbeddingConfig>) -> &'a EmbeddingConfig {
        requested.as_ref().unwrap_or(&self.config().embedding)
    }

    pub async fn ingest(
        &self,
        request: IngestRequest,
        progress: Arc<ProgressFn>,
    ) -> Result<IngestResponse> {
        let started = Instant::now();
        let embedding = self.embedding_for(&request.embedding);

        let location = self.ingestor.locate(&request.repository)?;
        let result = self
            .ingestor
            .ingest(&request.repository, progress, request.force_update, embedding)
            .await;

        // A failed run may already have wiped the store a cached handle points at
        if !matches!(&result, Ok(outcome) if outcome.status == IngestStatus::Skipped) {
            self.retrievers.invalidate(&location.id).await;
        }
        let outcome = result?;

        Ok(IngestResponse::from_outcome(
            outcome,
            started.elapsed().as_millis() as u64,
        ))
    }

    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let handle = self
            .handle(&request.repository, self.embedding_for(&request.embedding))
            .await?;
        let results = handle.search(&request.query).await?;

        Ok(SearchResponse {
            repository: handle.locator().to_string(),
            results,
        })
    }

    /// Answer with the configured chat model
    pub async fn ask(&self, request: AskRequest) -> Result<AskResponse> {
        let model = MistralChat::new(&self.config().chat)?;
        self.ask_with(request, &model).await
    }

    pub async fn ask_with(&self, request: AskRequest, model: &dyn ChatModel) -> Result<AskResponse> {
        let handle = self
            .handle(&request.repository, self.embedding_for(&request.embedding))
            .await?;
        let answer = answer_question(&request.question, &request.chat_history, &handle, model)
            .await?;

        Ok(AskResponse {
            repository: handle.locator().to_string(),
            answer: answer.answer,
            sources: answer.sources,
        })
    }

    pub async fn remove(&self, request: RemoveRequest) -> Result<RemoveResponse> {
        let location = self.ingestor.locate(&request.repository)?;
        let removed = self
            .ingestor
            .remove_repository_data(&request.repository)
            .await?;
        self.retrievers.invalidate(&location.id).await;

        Ok(RemoveResponse {
            repository: location.locator.to_string(),
            removed,
        })
    }

    async fn handle(
        &self,
        repository: &str,
        embedding: &EmbeddingConfig,
    ) -> Result<Arc<RetrieverHandle>> {
        let location = self.ingestor.locate(repository)?;
        self.retrievers
            .get_or_open(&location, embedding, &self.config().retrieval)
            .await?
            .ok_or_else(|| RagError::NotIngested(location.locator.to_string()))
    }
}
