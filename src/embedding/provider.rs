use crate::error::EmbeddingError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of embedding backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
pub enum Provider {
    #[serde(rename = "ollama")]
    Ollama,
    #[serde(rename = "openai")]
    OpenAI,
    #[serde(rename = "mistral", alias = "mistralai")]
    MistralAI,
    /// Local ONNX model run in-process
    #[serde(rename = "fastembed", alias = "local")]
    FastEmbed,
}

impl Provider {
    /// Hosted providers refuse anonymous requests
    pub fn requires_api_key(self) -> bool {
        matches!(self, Provider::OpenAI | Provider::MistralAI)
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Provider::Ollama => "nomic-embed-text",
            Provider::OpenAI => "text-embedding-3-small",
            Provider::MistralAI => "mistral-embed",
            Provider::FastEmbed => "all-MiniLM-L6-v2",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Provider::Ollama => "http://localhost:11434",
            Provider::OpenAI => "https://api.openai.com/v1",
            Provider::MistralAI => "https://api.mistral.ai/v1",
            Provider::FastEmbed => "",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::Ollama => "Ollama",
            Provider::OpenAI => "OpenAI",
            Provider::MistralAI => "Mistral AI",
            Provider::FastEmbed => "FastEmbed",
        };
        f.write_str(name)
    }
}

impl FromStr for Provider {
    type Err = EmbeddingError;

    /// Accepts both the config names (`mistral`) and the display names (`Mistral AI`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
            .collect::<String>()
            .to_lowercase();

        match key.as_str() {
            "ollama" => Ok(Provider::Ollama),
            "openai" => Ok(Provider::OpenAI),
            "mistral" | "mistralai" => Ok(Provider::MistralAI),
            "fastembed" | "local" => Ok(Provider::FastEmbed),
            _ => Err(EmbeddingError::UnknownProvider(s.to_string())),
        }
    }
}
