//! HTTP embedding backends
//!
//! OpenAI and Mistral share the `/embeddings` request and response shape, so one
//! client serves both. Ollama uses its native `/api/embed` endpoint. Retrying is not
//! done here; the ingestion orchestrator owns the retry policy.

use super::EmbeddingProvider;
use crate::error::EmbeddingError;
use serde::Deserialize;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

fn build_client() -> Result<reqwest::Client, EmbeddingError> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| EmbeddingError::InitializationFailed(e.to_string()))
}

async fn error_from_response(label: &str, response: reqwest::Response) -> EmbeddingError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    EmbeddingError::GenerationFailed(format!("{} API error {}: {}", label, status, body.trim()))
}

fn check_count(expected: usize, actual: usize) -> Result<(), EmbeddingError> {
    if expected != actual {
        return Err(EmbeddingError::CountMismatch { expected, actual });
    }
    Ok(())
}

/// OpenAI-compatible `/embeddings` client (OpenAI, Mistral AI)
pub struct OpenAiCompatibleEmbeddings {
    client: reqwest::Client,
    label: String,
    endpoint: String,
    model: String,
    api_key: String,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiCompatibleEmbeddings {
    pub fn new(
        label: impl Into<String>,
        base_url: &str,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, EmbeddingError> {
        Ok(Self {
            client: build_client()?,
            label: label.into(),
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for OpenAiCompatibleEmbeddings {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        tracing::debug!("Requesting {} embeddings from {}", texts.len(), self.label);

        let expected = texts.len();
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                EmbeddingError::GenerationFailed(format!("{} request failed: {}", self.label, e))
            })?;

        if !response.status().is_success() {
            return Err(error_from_response(&self.label, response).await);
        }

        let mut parsed: OpenAiResponse = response.json().await.map_err(|e| {
            EmbeddingError::GenerationFailed(format!("Invalid {} response: {}", self.label, e))
        })?;

        // The API may return items out of order
        parsed.data.sort_by_key(|item| item.index);
        check_count(expected, parsed.data.len())?;

        Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Ollama `/api/embed` client
///
/// An optional API key is sent as a bearer token for Ollama instances behind an
/// authenticating proxy.
pub struct OllamaEmbeddings {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbeddings {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<&str>,
    ) -> Result<Self, EmbeddingError> {
        Ok(Self {
            client: build_client()?,
            endpoint: format!("{}/api/embed", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key: api_key.map(String::from),
        })
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for OllamaEmbeddings {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        tracing::debug!("Requesting {} embeddings from Ollama", texts.len());

        let expected = texts.len();
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            EmbeddingError::GenerationFailed(format!(
                "Ollama connection error (is Ollama running at {}?): {}",
                self.endpoint, e
            ))
        })?;

        if !response.status().is_success() {
            return Err(error_from_response("Ollama", response).await);
        }

        let parsed: OllamaResponse = response.json().await.map_err(|e| {
            EmbeddingError::GenerationFailed(format!("Invalid Ollama response: {}", e))
        })?;

        check_count(expected, parsed.embeddings.len())?;
        Ok(parsed.embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
