/// Configuration system for repo-rag
///
/// Supports loading from multiple sources with priority:
/// CLI args > Environment variables > Config file > Defaults
use crate::embedding::Provider;
use crate::error::{ConfigError, RagError};
use crate::paths::PlatformPaths;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Where snapshots, vector stores and lock files live
    #[serde(default)]
    pub storage: StorageConfig,

    /// Default embedding backend (callers may pass their own per request)
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Collection and chunking limits
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Batched embedding orchestration
    #[serde(default)]
    pub batching: BatchingConfig,

    /// Retrieval (MMR) parameters
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Chat model used to answer questions
    #[serde(default)]
    pub chat: ChatConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root data directory; `repos/`, `vector_stores/` and `locks/` live under it
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// How long an ingestion waits for another process ingesting the same repository
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,
}

/// Embedding backend selection
///
/// This is the full identity of an embedding space: two stores built with different
/// configurations are not comparable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
pub struct EmbeddingConfig {
    /// Backend name
    #[serde(default = "default_provider")]
    pub provider: Provider,

    /// Backend-specific model name (empty means the provider default)
    #[serde(default)]
    pub model: String,

    /// Credential for hosted providers
    #[serde(default)]
    pub api_key: Option<String>,

    /// Endpoint override (unset means the provider default)
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Indexing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Target chunk size in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters shared between neighbouring chunks
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Maximum number of files collected from one snapshot
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

/// Embedding orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    /// Chunks per embedding request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum embedding requests in flight
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Attempts per batch, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; doubles on each further retry
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound on the retry delay
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of chunks returned
    #[serde(default = "default_k")]
    pub k: usize,

    /// Candidate pool size before diversity selection
    #[serde(default = "default_fetch_k")]
    pub fetch_k: usize,

    /// 1.0 = pure relevance, 0.0 = pure diversity
    #[serde(default = "default_lambda_mult")]
    pub lambda_mult: f32,
}

/// Chat model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_chat_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_chat_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub temperature: f32,
}

// Default value functions
fn default_data_dir() -> PathBuf {
    PlatformPaths::project_data_dir()
}

fn default_lock_timeout() -> u64 {
    600
}

fn default_provider() -> Provider {
    Provider::Ollama
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_chunk_size() -> usize {
    2000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_max_files() -> usize {
    5000
}

fn default_batch_size() -> usize {
    500
}

fn default_max_workers() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    8000
}

fn default_k() -> usize {
    20
}

fn default_fetch_k() -> usize {
    50
}

fn default_lambda_mult() -> f32 {
    0.5
}

fn default_chat_model() -> String {
    "codestral-latest".to_string()
}

fn default_chat_base_url() -> String {
    "https://api.mistral.ai/v1".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            lock_timeout_secs: default_lock_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            api_key: None,
            base_url: None,
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_files: default_max_files(),
        }
    }
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_workers: default_max_workers(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            fetch_k: default_fetch_k(),
            lambda_mult: default_lambda_mult(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: default_chat_model(),
            api_key: None,
            base_url: default_chat_base_url(),
            temperature: 0.0,
        }
    }
}

impl EmbeddingConfig {
    /// Stable digest of the embedding identity, used as part of retriever cache keys
    ///
    /// The API key participates so a rotated credential gets a fresh backend.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.provider.to_string().as_bytes());
        hasher.update([0]);
        hasher.update(self.model.as_bytes());
        hasher.update([0]);
        hasher.update(self.api_key.as_deref().unwrap_or("").as_bytes());
        hasher.update([0]);
        hasher.update(self.base_url.as_deref().unwrap_or("").as_bytes());
        format!("{:x}", hasher.finalize())[..16].to_string()
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> Result<Self, RagError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseFailed(format!("Invalid TOML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default location or create default
    pub fn load_or_default() -> Result<Self, RagError> {
        let config_path = PlatformPaths::default_config_path();

        if config_path.exists() {
            tracing::info!("Loading config from: {}", config_path.display());
            Self::from_file(&config_path)
        } else {
            tracing::info!("No config file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), RagError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ConfigError::SaveFailed(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved config to: {}", path.display());
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), RagError> {
        fn invalid(key: &str, reason: String) -> RagError {
            ConfigError::InvalidValue {
                key: key.to_string(),
                reason,
            }
            .into()
        }

        if self.indexing.chunk_size == 0 {
            return Err(invalid(
                "indexing.chunk_size",
                "must be greater than 0".to_string(),
            ));
        }

        if self.indexing.chunk_overlap >= self.indexing.chunk_size {
            return Err(invalid(
                "indexing.chunk_overlap",
                format!(
                    "must be smaller than chunk_size ({}), got {}",
                    self.indexing.chunk_size, self.indexing.chunk_overlap
                ),
            ));
        }

        if self.indexing.max_files == 0 {
            return Err(invalid(
                "indexing.max_files",
                "must be greater than 0".to_string(),
            ));
        }

        if self.batching.batch_size == 0 {
            return Err(invalid(
                "batching.batch_size",
                "must be greater than 0".to_string(),
            ));
        }

        if self.batching.max_workers == 0 {
            return Err(invalid(
                "batching.max_workers",
                "must be greater than 0".to_string(),
            ));
        }

        if self.batching.max_attempts == 0 {
            return Err(invalid(
                "batching.max_attempts",
                "must be at least 1".to_string(),
            ));
        }

        if self.retrieval.k == 0 || self.retrieval.fetch_k < self.retrieval.k {
            return Err(invalid(
                "retrieval.fetch_k",
                format!(
                    "must be >= k and k must be > 0 (k = {}, fetch_k = {})",
                    self.retrieval.k, self.retrieval.fetch_k
                ),
            ));
        }

        if !(0.0..=1.0).contains(&self.retrieval.lambda_mult) {
            return Err(invalid(
                "retrieval.lambda_mult",
                format!(
                    "must be between 0.0 and 1.0, got {}",
                    self.retrieval.lambda_mult
                ),
            ));
        }

        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("REPO_RAG_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }

        if let Ok(provider) = std::env::var("REPO_RAG_EMBED_PROVIDER") {
            match provider.parse() {
                Ok(parsed) => self.embedding.provider = parsed,
                Err(e) => tracing::warn!("Ignoring REPO_RAG_EMBED_PROVIDER: {}", e),
            }
        }

        if let Ok(model) = std::env::var("REPO_RAG_EMBED_MODEL") {
            self.embedding.model = model;
        }

        if let Ok(key) = std::env::var("REPO_RAG_EMBED_API_KEY") {
            self.embedding.api_key = Some(key);
        }

        if let Ok(url) = std::env::var("REPO_RAG_EMBED_BASE_URL") {
            self.embedding.base_url = Some(url);
        }

        if let Ok(batch_size) = std::env::var("REPO_RAG_BATCH_SIZE")
            && let Ok(size) = batch_size.parse()
        {
            self.batching.batch_size = size;
        }

        if let Ok(workers) = std::env::var("REPO_RAG_MAX_WORKERS")
            && let Ok(count) = workers.parse()
        {
            self.batching.max_workers = count;
        }

        if let Ok(key) = std::env::var("REPO_RAG_CHAT_API_KEY") {
            self.chat.api_key = Some(key);
        }
    }

    /// Create a new Config with defaults and environment overrides
    pub fn new() -> Result<Self, RagError> {
        let mut config = Self::load_or_default()?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}
