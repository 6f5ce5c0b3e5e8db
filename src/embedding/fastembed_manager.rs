use super::EmbeddingProvider;
use crate::error::EmbeddingError;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Arc, Mutex};

/// FastEmbed-based local embedding provider
///
/// The ONNX session needs `&mut` access, so the model sits behind a mutex and every
/// batch runs on a blocking thread.
pub struct FastEmbedManager {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
}

impl FastEmbedManager {
    /// Create a new FastEmbedManager with the default model (all-MiniLM-L6-v2)
    pub fn new() -> Result<Self, EmbeddingError> {
        Self::with_model(EmbeddingModel::AllMiniLML6V2, "all-MiniLM-L6-v2")
    }

    /// Resolve a model by its common name
    pub fn from_model_name(name: &str) -> Result<Self, EmbeddingError> {
        let model = match name {
            "all-MiniLM-L6-v2" | "sentence-transformers/all-MiniLM-L6-v2" => {
                EmbeddingModel::AllMiniLML6V2
            }
            "all-MiniLM-L12-v2" | "sentence-transformers/all-MiniLM-L12-v2" => {
                EmbeddingModel::AllMiniLML12V2
            }
            "bge-small-en-v1.5" | "BAAI/bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            "bge-base-en-v1.5" | "BAAI/bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
            "nomic-embed-text" | "nomic-ai/nomic-embed-text-v1.5" => {
                EmbeddingModel::NomicEmbedTextV15
            }
            other => {
                return Err(EmbeddingError::InitializationFailed(format!(
                    "unknown FastEmbed model '{}'",
                    other
                )));
            }
        };
        Self::with_model(model, name)
    }

    fn with_model(model: EmbeddingModel, name: &str) -> Result<Self, EmbeddingError> {
        tracing::info!("Initializing FastEmbed model: {:?}", model);

        let mut options = InitOptions::default();
        options.model_name = model;
        options.show_download_progress = true;

        let embedding_model = TextEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::InitializationFailed(e.to_string()))?;

        Ok(Self {
            model: Arc::new(Mutex::new(embedding_model)),
            model_name: name.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for FastEmbedManager {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        tracing::debug!("Generating {} local embeddings", texts.len());

        let model = Arc::clone(&self.model);
        tokio::task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|e| EmbeddingError::GenerationFailed(format!("model lock poisoned: {}", e)))?;
            guard
                .embed(texts, None)
                .map_err(|e| EmbeddingError::GenerationFailed(e.to_string()))
        })
        .await
        .map_err(|e| EmbeddingError::GenerationFailed(format!("embedding task failed: {}", e)))?
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_model_name() {
        let err = FastEmbedManager::from_model_name("not-a-model")
            .err()
            .expect("unknown model must fail");
        assert!(err.to_string().contains("not-a-model"));
    }

    // Downloads the ONNX model on first run
    #[tokio::test]
    #[ignore]
    async fn test_embedding_generation() {
        let manager = FastEmbedManager::new().unwrap();
        let texts = vec![
            "fn main() { println!(\"Hello, world!\"); }".to_string(),
            "pub struct Vector { x: f32, y: f32 }".to_string(),
        ];

        let embeddings = manager.embed_batch(texts).await.unwrap();
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].len(), 384);
        assert_eq!(manager.model_name(), "all-MiniLM-L6-v2");
    }
}
