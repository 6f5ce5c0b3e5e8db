use crate::error::RagError;
use crate::ingest::ProgressFn;
use crate::service::RagService;
use crate::types::*;

use anyhow::{Context, Result};
use rmcp::{
    ErrorData as McpError, Peer, RoleServer, ServerHandler, ServiceExt,
    handler::server::{router::prompt::PromptRouter, tool::ToolRouter, wrapper::Parameters},
    model::*,
    prompt, prompt_handler, prompt_router, service::RequestContext, tool, tool_handler,
    tool_router,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct RagMcpServer {
    service: Arc<RagService>,
    tool_router: ToolRouter<Self>,
    prompt_router: PromptRouter<Self>,
}

impl RagMcpServer {
    /// Create a server from the config file and environment
    pub fn new() -> Result<Self> {
        let service = RagService::from_env().context("Failed to load configuration")?;
        Ok(Self::with_service(Arc::new(service)))
    }

    pub fn with_service(service: Arc<RagService>) -> Self {
        Self {
            service,
            tool_router: Self::tool_router(),
            prompt_router: Self::prompt_router(),
        }
    }

    pub fn service(&self) -> &RagService {
        &self.service
    }
}

/// Forward ingestion progress to the client as MCP progress notifications
///
/// The returned task finishes once every clone of the callback has been dropped.
fn progress_forwarder(peer: Peer<RoleServer>, token: ProgressToken) -> (Arc<ProgressFn>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<(String, u8)>();

    let task = tokio::spawn(async move {
        while let Some((message, percent)) = rx.recv().await {
            if let Err(e) = peer
                .notify_progress(ProgressNotificationParam {
                    progress_token: token.clone(),
                    progress: percent as f64,
                    total: Some(100.0),
                    message: Some(message),
                })
                .await
            {
                tracing::debug!("Dropping progress notification: {}", e);
            }
        }
    });

    let callback: Arc<ProgressFn> = Arc::new(move |message: &str, percent: u8| {
        let _ = tx.send((message.to_string(), percent));
    });
    (callback, task)
}

/// Tool error text; transient failures say so, so the client knows to call again
fn tool_error(err: RagError) -> String {
    if err.is_retryable() {
        format!("{} (temporary failure, retrying may succeed)", err)
    } else {
        err.to_string()
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("Serialization failed: {}", e))
}

#[tool_router(router = tool_router)]
impl RagMcpServer {
    #[tool(
        description = "Ingest a remote git repository (URL, optionally suffixed with #branch) into a vector index. Skips the rebuild when the remote head is unchanged unless force_update is set."
    )]
    async fn ingest_repository(
        &self,
        meta: Meta,
        peer: Peer<RoleServer>,
        Parameters(req): Parameters<IngestRequest>,
    ) -> Result<String, String> {
        req.validate()?;

        let (progress, forwarder) = match meta.get_progress_token() {
            Some(token) => {
                let (callback, task) = progress_forwarder(peer, token);
                (callback, Some(task))
            }
            None => (Arc::new(|_: &str, _: u8| {}) as Arc<ProgressFn>, None),
        };

        let result = self.service.ingest(req, progress).await;
        if let Some(task) = forwarder {
            let _ = task.await;
        }

        let response = result.map_err(tool_error)?;
        to_json(&response)
    }

    #[tool(description = "Retrieve the code chunks of an ingested repository most relevant to a query")]
    async fn search_repository(
        &self,
        Parameters(req): Parameters<SearchRequest>,
    ) -> Result<String, String> {
        req.validate()?;

        let response = self
            .service
            .search(req)
            .await
            .map_err(tool_error)?;

        to_json(&response)
    }

    #[tool(description = "Answer a question about an ingested repository, citing the files used")]
    async fn ask_repository(
        &self,
        Parameters(req): Parameters<AskRequest>,
    ) -> Result<String, String> {
        req.validate()?;

        let response = self
            .service
            .ask(req)
            .await
            .map_err(tool_error)?;

        to_json(&response)
    }

    #[tool(description = "Delete the local snapshot and vector index of a repository")]
    async fn remove_repository(
        &self,
        Parameters(req): Parameters<RemoveRequest>,
    ) -> Result<String, String> {
        req.validate()?;

        let response = self
            .service
            .remove(req)
            .await
            .map_err(tool_error)?;

        to_json(&response)
    }
}

#[prompt_router]
impl RagMcpServer {
    #[prompt(
        name = "ingest",
        description = "Ingest a remote repository so it can be searched and questioned"
    )]
    async fn ingest_prompt(
        &self,
        Parameters(args): Parameters<serde_json::Value>,
    ) -> Result<GetPromptResult, McpError> {
        let repository = args
            .get("repository")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        let messages = vec![PromptMessage::new_text(
            PromptMessageRole::User,
            format!(
                "Please ingest the repository '{}'. The index is only rebuilt when the remote branch has new commits.",
                repository
            ),
        )];

        Ok(GetPromptResult {
            description: Some(format!("Ingest repository {}", repository)),
            messages,
        })
    }

    #[prompt(
        name = "ask",
        description = "Ask a question about an ingested repository"
    )]
    async fn ask_prompt(
        &self,
        Parameters(args): Parameters<serde_json::Value>,
    ) -> Result<Vec<PromptMessage>, McpError> {
        let repository = args
            .get("repository")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let question = args.get("question").and_then(|v| v.as_str()).unwrap_or("");

        Ok(vec![PromptMessage::new_text(
            PromptMessageRole::User,
            format!(
                "Using the indexed repository '{}', answer: {}",
                repository, question
            ),
        )])
    }
}

#[tool_handler(router = self.tool_router)]
#[prompt_handler]
impl ServerHandler for RagMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_prompts()
                .build(),
            server_info: Implementation {
                name: "repo-rag".into(),
                title: Some("Repo RAG - Question answering over remote repositories".into()),
                version: env!("CARGO_PKG_VERSION").into(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Retrieval-augmented question answering over git repositories. \
                Use ingest_repository first, then search_repository for raw context or \
                ask_repository for an answer with sources."
                    .into(),
            ),
        }
    }
}

impl RagMcpServer {
    pub async fn serve_stdio(self) -> Result<()> {
        tracing::info!(
            "Starting repo-rag MCP server (data dir {})",
            self.service.config().storage.data_dir.display()
        );

        let transport = rmcp::transport::io::stdio();

        self.serve(transport).await?.waiting().await?;

        Ok(())
    }
}
