use crate::config::Settings;
use crate::llm::error::LlmDiagnosticsError;
use crate::llm::text::clean_summary;
use crate::llm::{EndpointOptions, Provider, Summarizer, SummaryPrompt};
use anyhow::Context;
use serde::{Deserialize, Serialize};

const API_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-haiku-20240307";

/// Messages API client used for per-ticker summaries.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    opts: EndpointOptions,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, opts: EndpointOptions) -> anyhow::Result<Self> {
        Ok(Self {
            http: opts.http_client()?,
            api_key: api_key.into(),
            opts,
        })
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        Self::new(
            settings.require_anthropic_api_key()?,
            EndpointOptions::from_env("ANTHROPIC", DEFAULT_BASE_URL, DEFAULT_MODEL),
        )
    }

    /// Sends one message exchange and returns the decoded reply together with
    /// the raw body, which is kept for diagnostics.
    async fn send(&self, body: &MessagesRequest<'_>) -> anyhow::Result<(MessagesResponse, String)> {
        let res = self
            .http
            .post(self.opts.endpoint("v1/messages"))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
            .send()
            .await
            .context("Anthropic request failed")?;

        let status = res.status();
        let raw = res
            .text()
            .await
            .context("failed to read Anthropic response body")?;
        if !status.is_success() {
            return Err(LlmDiagnosticsError::new(
                Provider::Anthropic,
                "http",
                format!("status={status}"),
                Some(raw),
            )
            .into());
        }

        let decoded = serde_json::from_str::<MessagesResponse>(&raw)
            .with_context(|| format!("failed to decode Anthropic response: {raw}"))?;
        Ok((decoded, raw))
    }
}

impl MessagesResponse {
    fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                Block::Text { text } => Some(text.as_str()),
                Block::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait::async_trait]
impl Summarizer for AnthropicClient {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn summarize(&self, prompt: &SummaryPrompt) -> anyhow::Result<String> {
        let body = MessagesRequest {
            model: &self.opts.model,
            max_tokens: self.opts.max_tokens,
            system: &prompt.system,
            messages: [UserTurn {
                role: "user",
                content: &prompt.user,
            }],
        };
        let (reply, raw) = self.send(&body).await?;

        if reply.stop_reason.as_deref() == Some("max_tokens") {
            tracing::debug!(ticker = %prompt.ticker, "summary truncated at max_tokens");
        }

        let summary = clean_summary(&reply.joined_text());
        if summary.is_empty() {
            return Err(LlmDiagnosticsError::new(
                Provider::Anthropic,
                "empty_response",
                format!("no summary text for {}", prompt.ticker),
                Some(raw),
            )
            .into());
        }
        Ok(summary)
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: [UserTurn<'a>; 1],
}

#[derive(Debug, Serialize)]
struct UserTurn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<Block>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Block {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}
