//! Embedding backends
//!
//! The rest of the crate only sees [`EmbeddingProvider`]: "given texts, return vectors".
//! Which backend answers is decided once, by [`create_provider`] (or [`load_provider`]
//! from async code), from the closed
//! [`Provider`] set carried in an [`EmbeddingConfig`].

mod fastembed_manager;
mod http;
mod provider;

pub use fastembed_manager::FastEmbedManager;
pub use http::{OllamaEmbeddings, OpenAiCompatibleEmbeddings};
pub use provider::Provider;

use crate::config::EmbeddingConfig;
use crate::error::EmbeddingError;
use std::sync::Arc;

/// Trait for embedding generation
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate one embedding per input text, in input order
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Build the embedding backend described by `config`
///
/// Fails before any network traffic when a hosted provider is missing its API key.
pub fn create_provider(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    let model = if config.model.trim().is_empty() {
        config.provider.default_model().to_string()
    } else {
        config.model.trim().to_string()
    };

    let api_key = config
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty());

    if config.provider.requires_api_key() && api_key.is_none() {
        return Err(EmbeddingError::MissingCredential(
            config.provider.to_string(),
        ));
    }

    let base_url = config
        .base_url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| config.provider.default_base_url());

    tracing::info!(
        "Creating {} embedding provider with model {}",
        config.provider,
        model
    );

    let provider: Arc<dyn EmbeddingProvider> = match config.provider {
        Provider::Ollama => Arc::new(OllamaEmbeddings::new(base_url, model, api_key)?),
        Provider::OpenAI | Provider::MistralAI => Arc::new(OpenAiCompatibleEmbeddings::new(
            config.provider.to_string(),
            base_url,
            model,
            api_key.unwrap_or_default(),
        )?),
        Provider::FastEmbed => Arc::new(FastEmbedManager::from_model_name(&model)?),
    };

    Ok(provider)
}

/// [`create_provider`] on a blocking thread
///
/// Constructing a FastEmbed backend loads (and possibly downloads) an ONNX model.
pub async fn load_provider(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    let config = config.clone();
    tokio::task::spawn_blocking(move || create_provider(&config))
        .await
        .map_err(|e| EmbeddingError::InitializationFailed(format!("loader task failed: {}", e)))?
}

/// Embed a single query text
pub async fn embed_query(
    provider: &dyn EmbeddingProvider,
    text: &str,
) -> Result<Vec<f32>, EmbeddingError> {
    provider
        .embed_batch(vec![text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| EmbeddingError::GenerationFailed("empty embedding response".into()))
}

/// Cosine similarity between two vectors; 0.0 when either is all zeros
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}
