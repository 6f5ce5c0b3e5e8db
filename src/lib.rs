//! # Repo RAG - Question Answering over Remote Git Repositories
//!
//! Ingests a remote source-code repository into a persistent per-repository vector
//! index and answers natural-language questions about it with retrieval-augmented
//! generation. Exposed as a library, a CLI and an MCP server.
//!
//! ## Ingestion pipeline
//!
//! ```text
//! locator ──► normalize / id ──► ls-remote ──► unchanged? ──► Skipped
//!                                                  │ no
//!                                                  ▼
//!            wipe ──► shallow clone ──► collect files ──► split ──► embed (batched,
//!            bounded concurrency, retried) ──► LanceDB ──► commit_hash.txt ──► Updated
//! ```
//!
//! Progress is reported on a fixed stage table (version check 0-5, fetch 5-45,
//! collect 45-60, split 60-65, embed 65-100) and never goes backwards. The version
//! marker sidecar is written last; a store without one is always rebuilt.
//!
//! ## Modules
//!
//! - [`identity`]: locator normalization, branch suffixes, repository ids and on-disk layout
//! - [`git`]: remote head lookup and shallow snapshots via libgit2
//! - [`indexer`]: file collection and recursive character chunking
//! - [`embedding`]: embedding backends (Ollama, OpenAI, Mistral AI, local FastEmbed)
//! - [`ingest`]: the ingestion entry point, progress, retry and batched embedding
//! - [`vector_db`]: LanceDB store per repository plus the version marker
//! - [`retriever`]: MMR retrieval and the retriever cache
//! - [`qa`]: prompt assembly and chat model boundary
//! - [`service`]: serving layer shared by the CLI and the MCP server
//! - [`mcp_server`]: MCP stdio server
//! - [`config`]: configuration file, environment overrides and validation
//! - [`types`]: request/response types with JSON schema
//! - [`error`]: error types and result aliases
//! - [`paths`]: platform data and config directories
//!
//! ## Usage Example
//!
//! ```no_run
//! use repo_rag::config::Config;
//! use repo_rag::ingest::Ingestor;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::new()?;
//!     let embedding = config.embedding.clone();
//!     let ingestor = Ingestor::new(config);
//!
//!     let outcome = ingestor
//!         .ingest(
//!             "https://github.com/acme/widgets#main",
//!             Arc::new(|message: &str, percent: u8| println!("{:>3}% {}", percent, message)),
//!             false,
//!             &embedding,
//!         )
//!         .await?;
//!     println!("{:?} -> {}", outcome.status, outcome.store_path.display());
//!     Ok(())
//! }
//! ```

/// Configuration management with environment variable overrides
pub mod config;

/// Embedding backends behind a single provider trait
pub mod embedding;

/// Error types and utilities
pub mod error;

/// Remote version check and shallow snapshot fetching
pub mod git;

/// Repository locators, ids and on-disk locations
pub mod identity;

/// File collection and text chunking
pub mod indexer;

/// Ingestion pipeline
pub mod ingest;

/// MCP server implementation with tools and prompts
pub mod mcp_server;

/// Platform directory helpers
pub mod paths;

/// Question answering over retrieved context
pub mod qa;

/// MMR retrieval over a repository's vector store
pub mod retriever;

/// Serving layer owning the ingestor and retriever cache
pub mod service;

/// MCP request/response types with JSON schema definitions
pub mod types;

/// Per-repository LanceDB vector store
pub mod vector_db;

pub use error::{RagError, Result};
pub use ingest::{IngestOutcome, IngestStatus, Ingestor};
pub use service::RagService;
