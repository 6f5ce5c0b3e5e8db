use crate::config::EmbeddingConfig;
use crate::ingest::{EmbedReport, IngestOutcome, IngestStatus};
use crate::qa::ChatTurn;
use crate::retriever::RetrievedChunk;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Request to ingest (or refresh) a repository
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IngestRequest {
    /// Repository URL, optionally suffixed with `#branch`
    pub repository: String,
    /// Rebuild even when the remote version is unchanged
    #[serde(default)]
    pub force_update: bool,
    /// Embedding backend; the server default is used when omitted
    #[serde(default)]
    pub embedding: Option<EmbeddingConfig>,
}

impl IngestRequest {
    pub fn validate(&self) -> Result<(), String> {
        validate_repository(&self.repository)
    }
}

/// Result of an ingestion run
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct IngestResponse {
    pub repository: String,
    pub repository_id: String,
    pub status: IngestStatus,
    /// Directory of the vector store
    pub store_path: String,
    /// Commit the store now reflects
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Embedding statistics, present when the store was rebuilt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<EmbedReport>,
    pub duration_ms: u64,
}

impl IngestResponse {
    pub fn from_outcome(outcome: IngestOutcome, duration_ms: u64) -> Self {
        Self {
            repository: outcome.locator.to_string(),
            repository_id: outcome.repository_id.to_string(),
            status: outcome.status,
            store_path: outcome.store_path.display().to_string(),
            version: outcome.version,
            report: outcome.report,
            duration_ms,
        }
    }
}

/// Request to retrieve the most relevant chunks of an ingested repository
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchRequest {
    pub repository: String,
    pub query: String,
    #[serde(default)]
    pub embedding: Option<EmbeddingConfig>,
}

impl SearchRequest {
    pub fn validate(&self) -> Result<(), String> {
        validate_repository(&self.repository)?;
        if self.query.trim().is_empty() {
            return Err("Query cannot be empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SearchResponse {
    pub repository: String,
    pub results: Vec<RetrievedChunk>,
}

/// Request to answer a question about an ingested repository
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AskRequest {
    pub repository: String,
    pub question: String,
    /// Earlier turns of the conversation, oldest first
    #[serde(default)]
    pub chat_history: Vec<ChatTurn>,
    #[serde(default)]
    pub embedding: Option<EmbeddingConfig>,
}

impl AskRequest {
    pub fn validate(&self) -> Result<(), String> {
        validate_repository(&self.repository)?;
        if self.question.trim().is_empty() {
            return Err("Question cannot be empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct AskResponse {
    pub repository: String,
    pub answer: String,
    /// Files the answer was grounded on
    pub sources: Vec<String>,
}

/// Request to delete a repository's snapshot and vector store
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RemoveRequest {
    pub repository: String,
}

impl RemoveRequest {
    pub fn validate(&self) -> Result<(), String> {
        validate_repository(&self.repository)
    }
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct RemoveResponse {
    pub repository: String,
    /// Whether anything existed on disk
    pub removed: bool,
}

fn validate_repository(repository: &str) -> Result<(), String> {
    if repository.trim().is_empty() {
        return Err("Repository cannot be empty".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::Provider;

    #[test]
    fn test_ingest_request_defaults() {
        let json = r#"{"repository": "https://github.com/acme/widgets"}"#;
        let req: IngestRequest = serde_json::from_str(json).unwrap();
        assert!(!req.force_update);
        assert!(req.embedding.is_none());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_ingest_request_with_embedding() {
        let json = r#"{
            "repository": "https://github.com/acme/widgets#dev",
            "force_update": true,
            "embedding": {"provider": "mistral", "model": "mistral-embed", "api_key": "k"}
        }"#;
        let req: IngestRequest = serde_json::from_str(json).unwrap();
        let embedding = req.embedding.unwrap();
        assert!(req.force_update);
        assert_eq!(embedding.provider, Provider::MistralAI);
        assert_eq!(embedding.api_key.as_deref(), Some("k"));
    }

    #[test]
    fn test_validation_rejects_blank_fields() {
        let remove = RemoveRequest {
            repository: "  ".to_string(),
        };
        assert!(remove.validate().is_err());

        let search = SearchRequest {
            repository: "https://github.com/acme/widgets".to_string(),
            query: "".to_string(),
            embedding: None,
        };
        assert_eq!(search.validate().unwrap_err(), "Query cannot be empty");

        let ask = AskRequest {
            repository: "https://github.com/acme/widgets".to_string(),
            question: "\n".to_string(),
            chat_history: vec![],
            embedding: None,
        };
        assert!(ask.validate().is_err());
    }

    #[test]
    fn test_ask_request_history() {
        let json = r#"{
            "repository": "https://github.com/acme/widgets",
            "question": "And the tests?",
            "chat_history": [{"question": "What is it?", "answer": "A widget library."}]
        }"#;
        let req: AskRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.chat_history.len(), 1);
        assert_eq!(req.chat_history[0].answer, "A widget library.");
    }

    #[test]
    fn test_ingest_response_omits_empty_fields() {
        let response = IngestResponse {
            repository: "https://github.com/acme/widgets".to_string(),
            repository_id: "abc".to_string(),
            status: IngestStatus::Skipped,
            store_path: "/data/vector_stores/abc".to_string(),
            version: None,
            report: None,
            duration_ms: 12,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "skipped");
        assert!(json.get("report").is_none());
        assert!(json.get("version").is_none());
    }
}
