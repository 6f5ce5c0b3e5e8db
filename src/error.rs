/// Centralized error types for repo-rag using thiserror
///
/// Every unrecoverable ingestion condition surfaces as a single [`RagError`] at the
/// `ingest` boundary with a human-readable message. Rendering is left to the caller.
use thiserror::Error;

/// Main error type for the RAG system
#[derive(Error, Debug)]
pub enum RagError {
    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Fetch(#[from] FetchError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Indexing error: {0}")]
    Indexing(#[from] IndexingError),

    #[error("Vector store error: {0}")]
    VectorDb(#[from] VectorDbError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Repository {0} is being ingested by another process")]
    Busy(String),

    #[error("Repository {0} has not been ingested yet")]
    NotIngested(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors related to input validation
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Empty {0}")]
    Empty(String),
}

/// Errors raised while snapshotting a remote repository
///
/// The three variants are kept distinct so callers can tell a missing repository
/// from a credential problem.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Repository not found: {locator}")]
    NotFound { locator: String },

    #[error("Authentication failed for {locator}: {reason}")]
    AuthDenied { locator: String, reason: String },

    #[error("Failed to fetch {locator}: {reason}")]
    Failed { locator: String, reason: String },
}

/// Errors related to embedding generation
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Unsupported embedding provider: {0}")]
    UnknownProvider(String),

    #[error("The {0} embedding provider requires an API key")]
    MissingCredential(String),

    #[error("Failed to initialize embedding model: {0}")]
    InitializationFailed(String),

    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),

    #[error("Embedding count mismatch: expected {expected}, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Invalid embedding dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Errors related to file collection and chunking
#[derive(Error, Debug)]
pub enum IndexingError {
    #[error("No valid files found in {0}")]
    NoFilesFound(String),

    #[error("Failed to walk directory: {0}")]
    WalkFailed(String),

    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

/// Errors related to vector store operations
#[derive(Error, Debug)]
pub enum VectorDbError {
    #[error("Failed to open vector store at {path}: {reason}")]
    OpenFailed { path: String, reason: String },

    #[error("Failed to store embeddings: {0}")]
    StoreFailed(String),

    #[error("Vector dimension {actual} does not match store dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Failed to search embeddings: {0}")]
    SearchFailed(String),

    #[error("Failed to write version marker: {0}")]
    MarkerWriteFailed(String),
}

/// Errors related to configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration file: {0}")]
    LoadFailed(String),

    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

/// Result alias used across the crate's public boundaries
pub type Result<T> = std::result::Result<T, RagError>;

impl From<anyhow::Error> for RagError {
    fn from(err: anyhow::Error) -> Self {
        RagError::Other(format!("{:#}", err))
    }
}

impl RagError {
    /// Check if this is a user error (bad input, bad credentials, missing repo)
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            RagError::Validation(_)
                | RagError::NotIngested(_)
                | RagError::Fetch(FetchError::NotFound { .. })
                | RagError::Fetch(FetchError::AuthDenied { .. })
                | RagError::Embedding(EmbeddingError::MissingCredential(_))
                | RagError::Embedding(EmbeddingError::UnknownProvider(_))
                | RagError::Config(ConfigError::InvalidValue { .. })
        )
    }

    /// Check if retrying the same call could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::Fetch(FetchError::Failed { .. })
                | RagError::Embedding(EmbeddingError::GenerationFailed(_))
                | RagError::Busy(_)
                | RagError::Io(_)
        )
    }
}
