//! Query-time access to a repository's vector store
//!
//! A [`RetrieverHandle`] pairs an opened store with the embedding backend that built it
//! and runs MMR search. Handles are cached by the serving layer in a [`RetrieverCache`],
//! which must be invalidated explicitly after a repository is re-ingested or removed.

mod mmr;

pub use mmr::maximal_marginal_relevance;

use crate::config::{EmbeddingConfig, RetrievalConfig};
use crate::embedding::{EmbeddingProvider, embed_query, load_provider};
use crate::error::{Result, ValidationError};
use crate::identity::{RepoLocation, RepositoryId, RepositoryLocator};
use crate::vector_db::LanceStore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One chunk selected for a query
#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct RetrievedChunk {
    pub source: String,
    pub repo: String,
    pub content: String,
    /// Cosine similarity to the query
    pub score: f32,
}

/// Opened store plus embedding backend and MMR parameters
pub struct RetrieverHandle {
    repository_id: RepositoryId,
    locator: RepositoryLocator,
    store: LanceStore,
    provider: Arc<dyn EmbeddingProvider>,
    params: RetrievalConfig,
}

impl RetrieverHandle {
    pub fn repository_id(&self) -> &RepositoryId {
        &self.repository_id
    }

    pub fn locator(&self) -> &RepositoryLocator {
        &self.locator
    }

    pub fn params(&self) -> &RetrievalConfig {
        &self.params
    }

    /// Embed `query`, take the `fetch_k` nearest chunks, keep `k` of them by MMR
    pub async fn search(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        if query.trim().is_empty() {
            return Err(ValidationError::Empty("query".to_string()).into());
        }

        let query_vector = embed_query(self.provider.as_ref(), query).await?;
        let candidates = self
            .store
            .similarity_search_with_vectors(query_vector.clone(), self.params.fetch_k)
            .await?;

        let vectors: Vec<Vec<f32>> = candidates.iter().map(|c| c.vector.clone()).collect();
        let picked = maximal_marginal_relevance(
            &query_vector,
            &vectors,
            self.params.lambda_mult,
            self.params.k,
        );

        tracing::debug!(
            "Query on {} matched {} candidates, kept {}",
            self.locator,
            candidates.len(),
            picked.len()
        );

        Ok(picked
            .into_iter()
            .map(|i| {
                let candidate = &candidates[i];
                RetrievedChunk {
                    source: candidate.source.clone(),
                    repo: candidate.repo.clone(),
                    content: candidate.content.clone(),
                    score: 1.0 - candidate.distance,
                }
            })
            .collect())
    }
}

/// Opens retrieval handles
pub struct Retriever;

impl Retriever {
    /// `Ok(None)` when the repository has never been ingested
    pub async fn open(
        location: &RepoLocation,
        embedding: &EmbeddingConfig,
        params: &RetrievalConfig,
    ) -> Result<Option<RetrieverHandle>> {
        if !location.store_dir.is_dir() {
            return Ok(None);
        }
        let provider = load_provider(embedding).await?;
        Self::open_with_provider(location, provider, params).await
    }

    pub async fn open_with_provider(
        location: &RepoLocation,
        provider: Arc<dyn EmbeddingProvider>,
        params: &RetrievalConfig,
    ) -> Result<Option<RetrieverHandle>> {
        if !location.store_dir.is_dir() {
            tracing::debug!("No vector store for {}", location.locator);
            return Ok(None);
        }

        let store = LanceStore::open(&location.store_dir).await?;
        Ok(Some(RetrieverHandle {
            repository_id: location.id.clone(),
            locator: location.locator.clone(),
            store,
            provider,
            params: params.clone(),
        }))
    }
}

type CacheKey = (RepositoryId, String);

/// Retriever handles keyed by repository id and embedding fingerprint
#[derive(Default)]
pub struct RetrieverCache {
    entries: RwLock<HashMap<CacheKey, Arc<RetrieverHandle>>>,
}

impl RetrieverCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached handle, or a freshly opened one; misses (`None`) are not cached
    pub async fn get_or_open(
        &self,
        location: &RepoLocation,
        embedding: &EmbeddingConfig,
        params: &RetrievalConfig,
    ) -> Result<Option<Arc<RetrieverHandle>>> {
        let key = (location.id.clone(), embedding.fingerprint());

        if let Some(handle) = self.entries.read().await.get(&key) {
            return Ok(Some(Arc::clone(handle)));
        }

        let Some(handle) = Retriever::open(location, embedding, params).await? else {
            return Ok(None);
        };

        let mut entries = self.entries.write().await;
        let handle = entries.entry(key).or_insert_with(|| Arc::new(handle));
        Ok(Some(Arc::clone(handle)))
    }

    /// Drop every cached handle for `id`; returns how many were removed
    pub async fn invalidate(&self, id: &RepositoryId) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|(entry_id, _), _| entry_id != id);
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!("Invalidated {} cached retrievers for {}", removed, id);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::Provider;
    use std::path::Path;
    use tempfile::TempDir;

    fn ollama() -> EmbeddingConfig {
        EmbeddingConfig {
            provider: Provider::Ollama,
            model: "nomic-embed-text".to_string(),
            api_key: None,
            base_url: Some("http://127.0.0.1:9".to_string()),
        }
    }

    #[tokio::test]
    async fn test_open_without_store_is_none() {
        let dir = TempDir::new().unwrap();
        let location = RepoLocation::resolve(dir.path(), "https://github.com/acme/never-ingested");
        let handle = Retriever::open(&location, &ollama(), &RetrievalConfig::default())
            .await
            .unwrap();
        assert!(handle.is_none());
    }

    #[tokio::test]
    async fn test_open_without_store_ignores_bad_credentials() {
        let dir = TempDir::new().unwrap();
        let location = RepoLocation::resolve(dir.path(), "https://github.com/acme/never-ingested");
        let config = EmbeddingConfig {
            provider: Provider::OpenAI,
            model: String::new(),
            api_key: None,
            base_url: None,
        };
        assert!(
            Retriever::open(&location, &config, &RetrievalConfig::default())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_cache_hits_and_invalidation() {
        let dir = TempDir::new().unwrap();
        let location = RepoLocation::resolve(dir.path(), "https://github.com/acme/widgets");
        std::fs::create_dir_all(&location.store_dir).unwrap();

        let cache = RetrieverCache::new();
        let params = RetrievalConfig::default();

        let first = cache
            .get_or_open(&location, &ollama(), &params)
            .await
            .unwrap()
            .unwrap();
        let second = cache
            .get_or_open(&location, &ollama(), &params)
            .await
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len().await, 1);

        let mut other_model = ollama();
        other_model.model = "mxbai-embed-large".to_string();
        cache
            .get_or_open(&location, &other_model, &params)
            .await
            .unwrap();
        assert_eq!(cache.len().await, 2);

        assert_eq!(cache.invalidate(&location.id).await, 2);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_cache_does_not_store_misses() {
        let dir = TempDir::new().unwrap();
        let location = RepoLocation::resolve(Path::new(dir.path()), "https://github.com/acme/none");
        let cache = RetrieverCache::new();
        let result = cache
            .get_or_open(&location, &ollama(), &RetrievalConfig::default())
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(cache.len().await, 0);
    }
}
