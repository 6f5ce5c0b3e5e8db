use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use repo_rag::config::Config;
use repo_rag::embedding::Provider;
use repo_rag::mcp_server::RagMcpServer;
use repo_rag::qa::ChatTurn;
use repo_rag::service::RagService;
use repo_rag::types::{AskRequest, IngestRequest, RemoveRequest, SearchRequest};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Ingest git repositories into a vector index and ask questions about them
#[derive(Parser)]
#[command(name = "repo-rag", version, about)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, env = "REPO_RAG_CONFIG")]
    config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Override the embedding provider (ollama, openai, mistral, fastembed)
    #[arg(long, global = true)]
    provider: Option<Provider>,

    /// Override the embedding model
    #[arg(long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a repository, skipping the rebuild when the remote head is unchanged
    Ingest {
        /// Repository URL, optionally suffixed with `#branch`
        repository: String,

        /// Rebuild even when the remote head is unchanged
        #[arg(long)]
        force: bool,
    },

    /// Delete a repository's snapshot and vector store
    Remove { repository: String },

    /// Print the chunks most relevant to a query
    Search { repository: String, query: String },

    /// Answer a question about an ingested repository
    Ask {
        repository: String,
        question: String,

        /// JSON file holding earlier turns: `[{"question": "...", "answer": "..."}]`
        #[arg(long)]
        history: Option<PathBuf>,
    },

    /// Run the MCP server over stdio
    Serve,

    /// Print version and build information
    Version,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load_or_default()?,
    };
    config.apply_env_overrides();

    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = dir.clone();
    }
    if let Some(provider) = cli.provider {
        config.embedding.provider = provider;
        // The configured model and endpoint belong to the previous provider
        config.embedding.model = cli.model.clone().unwrap_or_default();
        config.embedding.base_url = None;
    } else if let Some(model) = &cli.model {
        config.embedding.model = model.clone();
    }

    config.validate()?;
    Ok(config)
}

fn load_history(path: Option<&PathBuf>) -> Result<Vec<ChatTurn>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read chat history {}", path.display()))?;
    serde_json::from_str(&content).context("Chat history must be a JSON array of turns")
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout belongs to the MCP transport
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("repo-rag {}", env!("CARGO_PKG_VERSION"));
        println!("commit: {}", env!("GIT_COMMIT_HASH"));
        println!("built:  {}", env!("BUILD_TIMESTAMP"));
        return Ok(());
    }

    let service = Arc::new(RagService::new(load_config(&cli)?));

    match cli.command {
        Commands::Ingest { repository, force } => {
            let response = service
                .ingest(
                    IngestRequest {
                        repository,
                        force_update: force,
                        embedding: None,
                    },
                    Arc::new(|message: &str, percent: u8| {
                        eprintln!("[{:>3}%] {}", percent, message);
                    }),
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Remove { repository } => {
            let response = service.remove(RemoveRequest { repository }).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Search { repository, query } => {
            let response = service
                .search(SearchRequest {
                    repository,
                    query,
                    embedding: None,
                })
                .await?;
            for hit in &response.results {
                println!("--- {} (score {:.3})", hit.source, hit.score);
                println!("{}", hit.content);
            }
        }
        Commands::Ask {
            repository,
            question,
            history,
        } => {
            let response = service
                .ask(AskRequest {
                    repository,
                    question,
                    chat_history: load_history(history.as_ref())?,
                    embedding: None,
                })
                .await?;
            println!("{}", response.answer);
            if !response.sources.is_empty() {
                println!("\nSources:");
                for source in &response.sources {
                    println!("- {}", source);
                }
            }
        }
        Commands::Serve => {
            RagMcpServer::with_service(service).serve_stdio().await?;
        }
        Commands::Version => {}
    }

    Ok(())
}
