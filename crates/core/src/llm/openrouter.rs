use crate::config::Settings;
use crate::llm::error::LlmDiagnosticsError;
use crate::llm::text::clean_summary;
use crate::llm::{EndpointOptions, Provider, Summarizer, SummaryPrompt};
use anyhow::Context;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "meta-llama/llama-3.1-8b-instruct:free";
const TEMPERATURE: f32 = 0.4;
const STOP_SEQUENCES: &[&str] = &["\n\n\n", "---", "Note:", "IMPORTANT:"];

/// OpenAI-compatible chat completions, as served by OpenRouter.
#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: String,
    opts: EndpointOptions,
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>, opts: EndpointOptions) -> anyhow::Result<Self> {
        Ok(Self {
            http: opts.http_client()?,
            api_key: api_key.into(),
            opts,
        })
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        Self::new(
            settings.require_openrouter_api_key()?,
            EndpointOptions::from_env("OPENROUTER", DEFAULT_BASE_URL, DEFAULT_MODEL),
        )
    }

    fn diagnostics(stage: &'static str, detail: String, raw: Option<String>) -> anyhow::Error {
        LlmDiagnosticsError::new(Provider::OpenRouter, stage, detail, raw).into()
    }
}

/// "Thinking" models put their answer in `reasoning` and leave `content` empty.
fn message_text(res: &ChatResponse) -> Option<&str> {
    let message = &res.choices.first()?.message;
    message
        .content
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .or(message.reasoning.as_deref())
}

#[async_trait::async_trait]
impl Summarizer for OpenRouterClient {
    fn provider(&self) -> Provider {
        Provider::OpenRouter
    }

    async fn summarize(&self, prompt: &SummaryPrompt) -> anyhow::Result<String> {
        let req = ChatRequest {
            model: &self.opts.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            max_tokens: self.opts.max_tokens,
            temperature: TEMPERATURE,
            stop: STOP_SEQUENCES,
        };

        let res = self
            .http
            .post(self.opts.endpoint("chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("OpenRouter request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read OpenRouter response body")?;
        if !status.is_success() {
            return Err(Self::diagnostics("http", format!("status={status}"), Some(text)));
        }

        let parsed = serde_json::from_str::<ChatResponse>(&text)
            .with_context(|| format!("failed to decode OpenRouter response: {text}"))?;
        let raw = message_text(&parsed).unwrap_or_default();
        let cleaned = clean_summary(raw);
        if cleaned.is_empty() {
            return Err(Self::diagnostics(
                "empty_response",
                format!("no summary text for {}", prompt.ticker),
                Some(text),
            ));
        }
        Ok(cleaned)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stop: &'static [&'static str],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: serde_json::Value) -> ChatResponse {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn prefers_content_over_reasoning() {
        let res = parse(json!({"choices": [{"message": {
            "role": "assistant", "content": "Final.", "reasoning": "thinking..."
        }}]}));
        assert_eq!(message_text(&res), Some("Final."));
    }

    #[test]
    fn falls_back_to_reasoning_when_content_blank() {
        let res = parse(json!({"choices": [{"message": {
            "role": "assistant", "content": "  ", "reasoning": "Answer."
        }}]}));
        assert_eq!(message_text(&res), Some("Answer."));
    }

    #[test]
    fn no_choices_yields_none() {
        assert_eq!(message_text(&parse(json!({"choices": []}))), None);
    }
}
