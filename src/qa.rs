//! Question answering over a retriever
//!
//! The core only fixes the contract: a question, prior turns and a retriever go in; an
//! answer and the distinct source paths it was grounded on come out. The language
//! model behind [`ChatModel`] is pluggable; [`MistralChat`] talks to any
//! OpenAI-compatible `/chat/completions` endpoint.

use crate::config::ChatConfig;
use crate::error::{RagError, Result, ValidationError};
use crate::retriever::{RetrievedChunk, RetrieverHandle};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// A completed question/answer exchange
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ChatTurn {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct Answer {
    pub answer: String,
    /// Distinct `source` paths of the retrieved chunks, sorted
    pub sources: Vec<String>,
}

/// Text-in, text-out language model
#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

const PROMPT_TEMPLATE: &str = "Use the following pieces of context to answer the question at the end.
If you don't know the answer, just say that you don't know, don't try to make up an answer.

{context}

Chat History:
{chat_history}

Question: {question}

Answer:";

const CONDENSE_TEMPLATE: &str = "Given the following conversation and a follow up question, rephrase the follow up question to be a standalone question, in its original language.

Chat History:
{chat_history}
Follow Up Input: {question}
Standalone question:";

/// Substitute `{name}` placeholders in one left-to-right pass
///
/// Inserted values are never rescanned, so retrieved code that happens to contain
/// `{question}` or `{context}` reaches the model verbatim.
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match values.iter().find(|(name, _)| tail.starts_with(name)) {
            Some((name, value)) => {
                out.push_str(value);
                rest = &tail[name.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn render_history(history: &[ChatTurn]) -> String {
    history
        .iter()
        .map(|turn| format!("Human: {}\nAssistant: {}", turn.question, turn.answer))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fill the prompt template with retrieved context and prior turns
pub fn build_prompt(question: &str, history: &[ChatTurn], context: &[RetrievedChunk]) -> String {
    let context_text = context
        .iter()
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let history_text = render_history(history);

    fill_template(
        PROMPT_TEMPLATE,
        &[
            ("{context}", &context_text),
            ("{chat_history}", &history_text),
            ("{question}", question.trim()),
        ],
    )
}

/// Prompt asking the model to rewrite a follow-up into a self-contained question
pub fn build_condense_prompt(question: &str, history: &[ChatTurn]) -> String {
    let history_text = render_history(history);
    fill_template(
        CONDENSE_TEMPLATE,
        &[
            ("{chat_history}", &history_text),
            ("{question}", question.trim()),
        ],
    )
}

/// Rewrite `question` against `history`; unchanged when there is no history
async fn standalone_question(
    question: &str,
    history: &[ChatTurn],
    model: &dyn ChatModel,
) -> Result<String> {
    if history.is_empty() {
        return Ok(question.to_string());
    }

    let rewritten = model
        .complete(&build_condense_prompt(question, history))
        .await
        .map_err(|e| RagError::Other(format!("Chat model failed: {:#}", e)))?;
    let rewritten = rewritten.trim();

    if rewritten.is_empty() {
        return Ok(question.to_string());
    }
    tracing::debug!("Rewrote follow-up {:?} as {:?}", question, rewritten);
    Ok(rewritten.to_string())
}

/// Retrieve context for `question`, ask `model`, and report the grounding sources
///
/// With prior turns, the question is first condensed into a standalone one, which is
/// then used both for retrieval and in the final prompt.
pub async fn answer_question(
    question: &str,
    history: &[ChatTurn],
    handle: &RetrieverHandle,
    model: &dyn ChatModel,
) -> Result<Answer> {
    let question = question.trim();
    if question.is_empty() {
        return Err(ValidationError::Empty("question".to_string()).into());
    }

    let question = standalone_question(question, history, model).await?;
    let context = handle.search(&question).await?;
    let sources: BTreeSet<String> = context.iter().map(|c| c.source.clone()).collect();

    tracing::debug!(
        "Answering with {} chunks from {} files",
        context.len(),
        sources.len()
    );

    let prompt = build_prompt(&question, history, &context);
    let answer = model
        .complete(&prompt)
        .await
        .map_err(|e| RagError::Other(format!("Chat model failed: {:#}", e)))?;

    Ok(Answer {
        answer: answer.trim().to_string(),
        sources: sources.into_iter().collect(),
    })
}

/// Mistral (or any OpenAI-compatible) chat completions client
pub struct MistralChat {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

impl MistralChat {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                RagError::Config(crate::error::ConfigError::InvalidValue {
                    key: "chat.api_key".to_string(),
                    reason: "an API key is required to answer questions".to_string(),
                })
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| RagError::Other(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: api_key.to_string(),
            temperature: config.temperature,
        })
    }
}

#[async_trait::async_trait]
impl ChatModel for MistralChat {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            stream: false,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Chat request failed")?;

        let status = response.status();
        let text = response.text().await.context("Failed to read chat response")?;
        if !status.is_success() {
            anyhow::bail!("Chat API error {}: {}", status, text.trim());
        }

        let parsed: ChatResponse =
            serde_json::from_str(&text).context("Invalid chat completion response")?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("Chat completion returned no choices")
    }
}
