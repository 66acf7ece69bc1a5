use crate::config::Settings;
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;

pub mod anthropic;
pub mod error;
pub mod openrouter;
pub mod text;

pub use anthropic::AnthropicClient;
pub use error::LlmDiagnosticsError;
pub use openrouter::OpenRouterClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
    OpenRouter,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::OpenRouter => "openrouter",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Some(Provider::Anthropic),
            "openrouter" => Some(Provider::OpenRouter),
            _ => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Endpoint, model and limits shared by the HTTP backends. Read from
/// `<PREFIX>_BASE_URL`, `<PREFIX>_MODEL`, `<PREFIX>_MAX_TOKENS` and
/// `<PREFIX>_TIMEOUT_SECS`.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointOptions {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl EndpointOptions {
    pub fn from_env(prefix: &str, default_base_url: &str, default_model: &str) -> Self {
        let var = |name: &str| {
            std::env::var(format!("{prefix}_{name}"))
                .ok()
                .filter(|v| !v.trim().is_empty())
        };
        Self {
            base_url: var("BASE_URL").unwrap_or_else(|| default_base_url.to_string()),
            model: var("MODEL").unwrap_or_else(|| default_model.to_string()),
            max_tokens: var("MAX_TOKENS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_TOKENS),
            timeout: Duration::from_secs(
                var("TIMEOUT_SECS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn http_client(&self) -> anyhow::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .context("failed to build reqwest client")
    }
}

const DEFAULT_MAX_TOKENS: u32 = 200;
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// A fully rendered summarization request for one ticker.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryPrompt {
    pub ticker: String,
    pub system: String,
    pub user: String,
}

/// Text-generation backend. Returns cleaned, non-empty summary text.
#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    fn provider(&self) -> Provider;

    async fn summarize(&self, prompt: &SummaryPrompt) -> anyhow::Result<String>;
}

/// Picks the backend from `LLM_PROVIDER` (default anthropic).
pub fn summarizer_from_settings(settings: &Settings) -> anyhow::Result<Arc<dyn Summarizer>> {
    let provider = match settings.llm_provider.as_deref() {
        None => Provider::Anthropic,
        Some(raw) => Provider::parse(raw)
            .with_context(|| format!("unsupported LLM_PROVIDER: {raw}"))?,
    };
    Ok(match provider {
        Provider::Anthropic => Arc::new(AnthropicClient::from_settings(settings)?),
        Provider::OpenRouter => Arc::new(OpenRouterClient::from_settings(settings)?),
    })
}
